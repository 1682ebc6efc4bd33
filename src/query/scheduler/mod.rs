pub mod async_scheduler;
pub mod execution_schedule;
pub mod types;

pub use async_scheduler::ParallelRunner;
pub use execution_schedule::ExecutionSchedule;
pub use types::{RunReport, SubqueryExecutor, SubqueryTiming};

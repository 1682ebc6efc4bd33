//! 服务层模块
//!
//! - `query_service`：作业编排（缓存、验证、优化、并行判定、执行、写缓存）
//! - `policy`：并行判定与缓存策略
//! - `state`：作业状态机与进度上报
//! - `stats`：编排层计数器

pub mod policy;
pub mod query_service;
pub mod state;
pub mod stats;

pub use policy::ExecutionPolicy;
pub use query_service::{QueryExecutionService, WarmUpSummary};
pub use state::{JobState, JobTracker, ProgressCallback};
pub use stats::{ServiceReport, ServiceStats, ServiceStatsSnapshot};

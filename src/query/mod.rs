//! 查询处理
//!
//! - `optimizer`：规则改写、代价估算、索引建议、领域查询转换
//! - `planner`：并行化规划与时间分区
//! - `scheduler`：有界并发的子查询运行器
//! - `executor`：串行 / 子查询执行与结果合并
//! - `validator`：空查询、破坏性关键字与语法检查

pub mod executor;
pub mod optimizer;
pub mod planner;
pub mod scheduler;
pub mod validator;

pub use executor::{QueryExecutor, ResultMerger};
pub use optimizer::{OptimizedQuery, OptimizerStats, QueryOptimizer};
pub use planner::{MergeStrategy, ParallelPlanner, ParallelQueryPlan, ParallelSubquery, SubqueryTarget};
pub use scheduler::{ParallelRunner, RunReport, SubqueryExecutor};
pub use validator::{QueryValidator, ValidationReport};

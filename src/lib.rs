//! QueryCore - 分析型事件查询服务的自适应执行与结果缓存核心
//!
//! 给定一个查询作业（SQL / 检索索引 / 领域查询语言），决定是否拆分为可并发执行的子查询，
//! 在有界并发下运行并合并部分结果，并把结果缓存在可压缩、可去重的缓存之后。
//!
//! - `backend`：关系型后端、检索后端与键值缓存存储的接口及内存实现
//! - `query`：优化器、并行规划器、子查询调度、执行与合并、验证
//! - `cache`：结果缓存（精确键 / 压缩去重）与同键请求合并
//! - `services`：作业编排

pub mod backend;
pub mod cache;
pub mod config;
pub mod core;
pub mod query;
pub mod services;
pub mod utils;

pub use crate::core::error::{CoreResult, QueryError};
pub use crate::core::types::{QueryJob, QueryLanguage, QueryResult, TimeRange};
pub use services::QueryExecutionService;

//! 统一错误处理
//!
//! ## 恢复策略
//!
//! - `Validation`：直接返回给调用方，作业失败，不在本层重试
//! - `Optimization` / `ParallelPlanning`：本地恢复，退回原始查询或串行计划
//! - `ParallelExecution` / `Merge` / `UnsupportedMergeStrategy`：退回串行执行
//! - `Cache`：始终本地恢复并记录日志，缓存只是性能优化
//! - `Backend`（串行路径）：作业的终止错误

use serde::Serialize;
use thiserror::Error;

/// 统一的结果类型
pub type CoreResult<T> = Result<T, QueryError>;

/// 查询核心错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("验证错误: {0}")]
    Validation(String),

    #[error("优化错误: {0}")]
    Optimization(String),

    #[error("并行规划错误: {0}")]
    ParallelPlanning(String),

    #[error("并行执行错误: {0}")]
    ParallelExecution(String),

    #[error("不支持的合并策略: {0}")]
    UnsupportedMergeStrategy(String),

    #[error("结果合并错误: {0}")]
    Merge(String),

    #[error("缓存错误: {0}")]
    Cache(String),

    #[error("后端执行错误: {0}")]
    Backend(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl QueryError {
    /// 该错误是否可以在核心内部恢复（不导致作业失败）
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            QueryError::Optimization(_)
                | QueryError::ParallelPlanning(_)
                | QueryError::ParallelExecution(_)
                | QueryError::UnsupportedMergeStrategy(_)
                | QueryError::Merge(_)
                | QueryError::Cache(_)
        )
    }

    /// 把任意错误包装为后端执行错误
    pub fn backend<E: std::fmt::Display>(e: E) -> Self {
        QueryError::Backend(e.to_string())
    }

    /// 把任意错误包装为缓存错误
    pub fn cache<E: std::fmt::Display>(e: E) -> Self {
        QueryError::Cache(e.to_string())
    }

    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            QueryError::Validation(_) => ErrorCode::InvalidQuery,
            QueryError::Backend(_) => ErrorCode::ExecutionFailed,
            QueryError::Config(_) => ErrorCode::Misconfigured,
            QueryError::Optimization(_)
            | QueryError::ParallelPlanning(_)
            | QueryError::ParallelExecution(_)
            | QueryError::UnsupportedMergeStrategy(_)
            | QueryError::Merge(_)
            | QueryError::Cache(_)
            | QueryError::Serialization(_)
            | QueryError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// 转换为对外暴露的错误
    ///
    /// 内部错误不暴露细节，验证和后端错误返回原始消息
    pub fn to_public_error(&self) -> PublicError {
        let message = match self {
            QueryError::Validation(_) | QueryError::Backend(_) => self.to_string(),
            _ => "内部服务器错误".to_string(),
        };
        PublicError {
            code: self.to_error_code(),
            message,
        }
    }
}

/// 对外错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidQuery,
    ExecutionFailed,
    Misconfigured,
    Internal,
}

/// 作业来源看到的终止错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for QueryError {
    fn from(err: std::io::Error) -> Self {
        QueryError::Internal(err.to_string())
    }
}

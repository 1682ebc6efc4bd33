pub mod error;
pub mod types;

// 错误和结果类型
pub use error::{CoreResult, ErrorCode, PublicError, QueryError};

// 核心数据类型
pub use types::{
    ColumnInfo, ColumnType, JobPriority, ParamMap, QueryJob, QueryLanguage, QueryResult, Row,
    TimeRange,
};

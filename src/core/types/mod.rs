// 核心类型模块
//
// 查询作业、查询结果以及列描述等在各组件之间交换的数据类型

pub mod query;
pub mod result;

pub use query::{JobPriority, QueryJob, QueryLanguage, TimeRange};
pub use result::{ColumnInfo, ColumnType, QueryResult, Row};

/// 参数映射与元数据映射使用的 JSON 对象类型
pub type ParamMap = serde_json::Map<String, serde_json::Value>;

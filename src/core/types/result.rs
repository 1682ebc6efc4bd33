//! 查询结果类型

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ParamMap;

/// 行记录
pub type Row = serde_json::Map<String, Value>;

/// 列类型（从数据推断）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
    Timestamp,
    Json,
    Unknown,
}

impl ColumnType {
    /// 根据单个值推断列类型，`null` 无法推断
    pub fn infer(value: &Value) -> ColumnType {
        match value {
            Value::Null => ColumnType::Unknown,
            Value::Bool(_) => ColumnType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => ColumnType::Integer,
            Value::Number(_) => ColumnType::Float,
            Value::String(s) if DateTime::parse_from_rfc3339(s).is_ok() => ColumnType::Timestamp,
            Value::String(_) => ColumnType::Text,
            Value::Array(_) | Value::Object(_) => ColumnType::Json,
        }
    }
}

/// 列描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: ColumnType,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    /// 从行数据推断列描述
    ///
    /// 列集合取自第一行，类型取每列第一个非空值
    pub fn infer_from_rows(rows: &[Row]) -> Vec<ColumnInfo> {
        let Some(first) = rows.first() else {
            return Vec::new();
        };
        first
            .keys()
            .map(|name| {
                let data_type = rows
                    .iter()
                    .filter_map(|row| row.get(name))
                    .map(ColumnType::infer)
                    .find(|t| *t != ColumnType::Unknown)
                    .unwrap_or(ColumnType::Unknown);
                ColumnInfo::new(name.clone(), data_type)
            })
            .collect()
    }
}

/// 查询结果
///
/// 每次作业执行（或缓存命中）产生一次，是与所有外部协作方交换的单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub job_id: String,
    pub data: Vec<Row>,
    pub total_rows: u64,
    pub execution_time_ms: u64,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub metadata: ParamMap,
}

impl QueryResult {
    /// 创建结果，`total_rows` 等于数据行数
    pub fn new(
        job_id: impl Into<String>,
        data: Vec<Row>,
        columns: Vec<ColumnInfo>,
        execution_time_ms: u64,
    ) -> Self {
        let total_rows = data.len() as u64;
        Self {
            job_id: job_id.into(),
            data,
            total_rows,
            execution_time_ms,
            columns,
            metadata: ParamMap::new(),
        }
    }

    pub fn empty(job_id: impl Into<String>) -> Self {
        Self::new(job_id, Vec::new(), Vec::new(), 0)
    }

    /// 后端显式报告了与数据行数不同的总数（例如检索命中总数）
    pub fn with_reported_total(mut self, total_rows: u64) -> Self {
        self.total_rows = total_rows;
        self
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn set_flag(&mut self, key: &str, value: bool) {
        self.metadata.insert(key.to_string(), Value::Bool(value));
    }

    pub fn flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }
}

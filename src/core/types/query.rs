//! 查询作业类型
//!
//! `QueryJob` 提交给核心之后不可变，核心只会派生出改写了查询文本的副本

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ParamMap;
use crate::core::error::{CoreResult, QueryError};

/// 查询语言标签
///
/// 新增语言时所有按语言分派的 `match` 都会在编译期报错，
/// 不存在运行期的查表分派
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryLanguage {
    /// 关系型 / 时序型 SQL
    #[serde(rename = "sql")]
    Sql,
    /// 全文检索索引查询
    #[serde(rename = "search")]
    SearchIndex,
    /// 领域特定查询语言
    #[serde(rename = "dsl")]
    Dsl,
}

impl QueryLanguage {
    /// 缓存键和日志中使用的稳定标签
    pub fn tag(&self) -> &'static str {
        match self {
            QueryLanguage::Sql => "sql",
            QueryLanguage::SearchIndex => "search",
            QueryLanguage::Dsl => "dsl",
        }
    }
}

impl fmt::Display for QueryLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for QueryLanguage {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sql" => Ok(QueryLanguage::Sql),
            "search" | "search-index" | "search_index" => Ok(QueryLanguage::SearchIndex),
            "dsl" => Ok(QueryLanguage::Dsl),
            other => Err(QueryError::Validation(format!("未知的查询语言: {}", other))),
        }
    }
}

/// 作业优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// 半开时间区间 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        if end <= start {
            return Err(QueryError::Validation(format!(
                "时间范围无效: 结束时间 {} 不晚于开始时间 {}",
                end.to_rfc3339(),
                start.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// 从 RFC3339 字符串构造
    pub fn parse(start: &str, end: &str) -> CoreResult<Self> {
        let parse = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| QueryError::Validation(format!("无法解析时间 '{}': {}", s, e)))
        };
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// 区间跨度（小时，含小数）
    pub fn hours(&self) -> f64 {
        self.duration().num_milliseconds() as f64 / 3_600_000.0
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// 查询作业
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryJob {
    pub id: String,
    pub query: String,
    pub language: QueryLanguage,
    #[serde(default)]
    pub params: ParamMap,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub metadata: ParamMap,
}

impl QueryJob {
    pub fn new(query: impl Into<String>, language: QueryLanguage) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            query: query.into(),
            language,
            params: ParamMap::new(),
            time_range: None,
            priority: JobPriority::default(),
            metadata: ParamMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_params(mut self, params: ParamMap) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 派生一个查询文本被改写的副本，其余字段保持不变
    pub fn with_query(&self, query: impl Into<String>) -> Self {
        let mut derived = self.clone();
        derived.query = query.into();
        derived
    }

    /// 派生一个改写为另一种语言的副本（DSL 转换为 SQL 时使用）
    pub fn translated(&self, query: impl Into<String>, language: QueryLanguage) -> Self {
        let mut derived = self.with_query(query);
        derived.language = language;
        derived
    }

    pub fn is_realtime(&self) -> bool {
        self.metadata_flag("realtime")
    }

    pub fn is_user_scoped(&self) -> bool {
        self.metadata_flag("user_scoped") || self.metadata.contains_key("user_id")
    }

    /// 作业元数据中附带的缓存标签
    pub fn cache_tags(&self) -> Vec<String> {
        match self.metadata.get("cache_tags") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(tag)) => vec![tag.clone()],
            _ => Vec::new(),
        }
    }

    fn metadata_flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_language_tags() {
        assert_eq!(QueryLanguage::Sql.tag(), "sql");
        assert_eq!(QueryLanguage::SearchIndex.tag(), "search");
        assert_eq!("DSL".parse::<QueryLanguage>().unwrap(), QueryLanguage::Dsl);
        assert!("cypher".parse::<QueryLanguage>().is_err());
    }

    #[test]
    fn test_time_range_hours() {
        let range = TimeRange::parse("2024-01-01T00:00:00Z", "2024-01-01T10:30:00Z").unwrap();
        assert!((range.hours() - 10.5).abs() < f64::EPSILON);
        assert!(range.contains(range.start));
        assert!(!range.contains(range.end));
    }

    #[test]
    fn test_time_range_rejects_inverted() {
        assert!(TimeRange::parse("2024-01-02T00:00:00Z", "2024-01-01T00:00:00Z").is_err());
    }

    #[test]
    fn test_job_flags_and_tags() {
        let job = QueryJob::new("SELECT 1", QueryLanguage::Sql)
            .with_metadata("realtime", true)
            .with_metadata("cache_tags", json!(["alerts", "tenant:7"]));
        assert!(job.is_realtime());
        assert!(!job.is_user_scoped());
        assert_eq!(job.cache_tags(), vec!["alerts".to_string(), "tenant:7".to_string()]);

        let scoped = QueryJob::new("SELECT 1", QueryLanguage::Sql).with_metadata("user_id", "u-1");
        assert!(scoped.is_user_scoped());
    }

    #[test]
    fn test_derived_copy_keeps_identity() {
        let job = QueryJob::new("source:fw", QueryLanguage::Dsl).with_param("a", 1);
        let derived = job.translated("SELECT * FROM events", QueryLanguage::Sql);
        assert_eq!(derived.id, job.id);
        assert_eq!(derived.params, job.params);
        assert_eq!(derived.language, QueryLanguage::Sql);
        assert_eq!(job.language, QueryLanguage::Dsl);
    }
}

//! 检索索引后端接口

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{CoreResult, QueryError};
use crate::core::types::Row;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// 命中文档（`_source` 展开后的字段）
    pub hits: Vec<Row>,
    /// 后端报告的耗时（毫秒）
    pub took_ms: u64,
    /// 后端报告的命中总数，可能大于返回的文档数
    pub total: Option<u64>,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// 在具体索引（或索引模式）上执行检索
    async fn search(&self, index: &str, body: &Value) -> CoreResult<SearchResponse>;

    /// 通过目录把索引模式解析为具体索引名
    async fn resolve_indices(&self, pattern: &str) -> CoreResult<Vec<String>>;
}

/// 检索作业的查询文本：`<索引模式>` 或 `<索引模式>|<JSON 检索体>`
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub index: String,
    pub body: Value,
}

impl SearchRequest {
    pub fn new(index: impl Into<String>, body: Value) -> Self {
        Self {
            index: index.into(),
            body,
        }
    }

    pub fn parse(query: &str) -> CoreResult<Self> {
        let (index, body) = match query.split_once('|') {
            Some((index, body)) => {
                let body = serde_json::from_str(body.trim()).map_err(|e| {
                    QueryError::Validation(format!("检索体不是合法的 JSON: {}", e))
                })?;
                (index.trim(), body)
            }
            None => (query.trim(), Value::Object(Default::default())),
        };
        if index.is_empty() {
            return Err(QueryError::Validation("检索查询缺少索引模式".to_string()));
        }
        Ok(Self::new(index, body))
    }

    /// 索引模式是否包含通配符或多个索引
    pub fn is_wildcard(&self) -> bool {
        self.index.contains('*') || self.index.contains(',')
    }

    /// 同一检索体收窄到另一个索引
    pub fn narrowed_to(&self, index: &str) -> Self {
        Self::new(index, self.body.clone())
    }

    pub fn to_query(&self) -> String {
        match &self.body {
            Value::Object(map) if map.is_empty() => self.index.clone(),
            body => format!("{}|{}", self.index, body),
        }
    }
}

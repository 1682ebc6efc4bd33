//! 结果缓存特征定义

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::entry::EntryMetadata;
use crate::cache::stats_collector::CacheStats;
use crate::core::error::CoreResult;
use crate::core::types::{ParamMap, QueryLanguage, QueryResult};

/// 命中来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    /// 精确键命中
    Exact,
    /// 经由引用记录命中
    Reference,
    /// 近似重复检测命中，并新写入了引用记录
    Similar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub key: String,
    pub result: QueryResult,
    /// 命中后（已计入本次命中）的条目元数据
    pub metadata: EntryMetadata,
    pub source: HitSource,
}

/// 写入选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOptions {
    /// 为空时使用配置的默认 TTL
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// 预热用的代表性查询
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmUpQuery {
    pub language: QueryLanguage,
    pub query: String,
    #[serde(default)]
    pub params: ParamMap,
}

impl WarmUpQuery {
    pub fn new(language: QueryLanguage, query: impl Into<String>) -> Self {
        Self {
            language,
            query: query.into(),
            params: ParamMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmUpReport {
    pub warm: Vec<WarmUpQuery>,
    pub cold: Vec<WarmUpQuery>,
}

/// 查询结果缓存
///
/// 所有操作都可能返回 `QueryError::Cache`；调用方把它当作未命中处理。
#[async_trait]
pub trait ResultCache: Send + Sync + std::fmt::Debug {
    async fn get(
        &self,
        language: QueryLanguage,
        query: &str,
        params: &ParamMap,
    ) -> CoreResult<Option<CacheHit>>;

    /// 写入结果，返回缓存键
    async fn set(
        &self,
        language: QueryLanguage,
        query: &str,
        result: &QueryResult,
        options: SetOptions,
        params: &ParamMap,
        execution_time_ms: u64,
    ) -> CoreResult<String>;

    /// 只检查存在，不计命中
    async fn contains(&self, language: QueryLanguage, query: &str, params: &ParamMap) -> CoreResult<bool>;

    /// 删除带有任一标签的条目，返回删除的条目数
    async fn invalidate_by_tags(&self, tags: &[String]) -> CoreResult<usize>;

    async fn clear(&self) -> CoreResult<usize>;

    async fn stats(&self) -> CoreResult<CacheStats>;

    /// 预热检查：只区分已缓存与未缓存，不执行查询
    async fn warm_up(&self, queries: &[WarmUpQuery]) -> CoreResult<WarmUpReport> {
        let mut report = WarmUpReport::default();
        for query in queries {
            if self.contains(query.language, &query.query, &query.params).await? {
                report.warm.push(query.clone());
            } else {
                report.cold.push(query.clone());
            }
        }
        log::info!(
            "缓存预热检查完成: {} 条已缓存, {} 条未缓存",
            report.warm.len(),
            report.cold.len()
        );
        Ok(report)
    }
}

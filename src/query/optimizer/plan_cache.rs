//! 优化计划缓存
//!
//! 以（查询语言、规范化查询文本）为键的 LRU 缓存，命中时原样返回已缓存的计划。

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::core::error::{CoreResult, QueryError};
use crate::core::types::QueryLanguage;
use crate::query::optimizer::OptimizedQuery;

/// 计划缓存键
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct PlanCacheKey {
    language: QueryLanguage,
    normalized: String,
}

impl PlanCacheKey {
    pub fn new(language: QueryLanguage, query: &str) -> Self {
        Self {
            language,
            normalized: normalize_query(query),
        }
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }
}

/// 小写化并折叠空白
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 计划缓存统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
}

impl PlanCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub struct PlanCache {
    cache: Mutex<LruCache<PlanCacheKey, OptimizedQuery>>,
    stats: Mutex<PlanCacheStats>,
}

impl PlanCache {
    pub fn new(max_entries: usize) -> CoreResult<Self> {
        let capacity = NonZeroUsize::new(max_entries)
            .ok_or_else(|| QueryError::Config("计划缓存大小必须大于0".to_string()))?;
        Ok(Self {
            cache: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(PlanCacheStats::default()),
        })
    }

    pub fn get(&self, key: &PlanCacheKey) -> Option<OptimizedQuery> {
        let mut cache = self.cache.lock();
        let found = cache.get(key).cloned();
        let mut stats = self.stats.lock();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    pub fn put(&self, key: PlanCacheKey, plan: OptimizedQuery) {
        let mut cache = self.cache.lock();
        // push 在容量已满且键为新键时返回被淘汰的条目
        let evicted = cache.push(key.clone(), plan);
        let mut stats = self.stats.lock();
        stats.inserts += 1;
        if matches!(evicted, Some((old, _)) if old != key) {
            stats.evictions += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn stats(&self) -> PlanCacheStats {
        self.stats.lock().clone()
    }
}

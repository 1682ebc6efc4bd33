//! 精确键结果缓存

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::backend::CacheStore;
use crate::cache::cache_impl::{serialize_result, EntryStore};
use crate::cache::entry::{CacheEntry, EntryMetadata};
use crate::cache::key::cache_key;
use crate::cache::stats_collector::CacheStats;
use crate::cache::traits::{CacheHit, ResultCache, SetOptions};
use crate::config::CacheConfig;
use crate::core::error::CoreResult;
use crate::core::types::{ParamMap, QueryLanguage, QueryResult};

#[derive(Debug)]
pub struct PlainResultCache {
    entries: EntryStore,
}

impl PlainResultCache {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            entries: EntryStore::new(store, config),
        }
    }
}

#[async_trait]
impl ResultCache for PlainResultCache {
    async fn get(
        &self,
        language: QueryLanguage,
        query: &str,
        params: &ParamMap,
    ) -> CoreResult<Option<CacheHit>> {
        let started = Instant::now();
        let key = cache_key(language, query, params);
        let outcome = self.entries.lookup(&key).await;
        self.entries.observe(started, &outcome);

        match &outcome {
            Ok(Some(_)) => self.entries.stats().record_hit(),
            _ => self.entries.stats().record_miss(),
        }
        outcome
    }

    async fn set(
        &self,
        language: QueryLanguage,
        query: &str,
        result: &QueryResult,
        options: SetOptions,
        params: &ParamMap,
        execution_time_ms: u64,
    ) -> CoreResult<String> {
        let started = Instant::now();
        let key = cache_key(language, query, params);
        let outcome = async {
            let ttl = self.entries.ttl_or_default(options.ttl);
            let (json, hash) = serialize_result(result)?;
            let entry = CacheEntry::inline(
                json,
                hash,
                EntryMetadata::new(options.tags, ttl, execution_time_ms),
            );
            self.entries.write(&key, &entry, ttl).await
        }
        .await;
        self.entries.observe(started, &outcome);
        outcome?;

        self.entries.stats().record_set(0);
        log::debug!("缓存结果已写入: {}", key);
        Ok(key)
    }

    async fn contains(&self, language: QueryLanguage, query: &str, params: &ParamMap) -> CoreResult<bool> {
        self.entries.exists(&cache_key(language, query, params)).await
    }

    async fn invalidate_by_tags(&self, tags: &[String]) -> CoreResult<usize> {
        let started = Instant::now();
        let outcome = self.entries.invalidate_by_tags(tags).await;
        self.entries.observe(started, &outcome);
        outcome
    }

    async fn clear(&self) -> CoreResult<usize> {
        let started = Instant::now();
        let outcome = self.entries.clear().await;
        self.entries.observe(started, &outcome);
        outcome
    }

    async fn stats(&self) -> CoreResult<CacheStats> {
        self.entries.snapshot().await
    }
}

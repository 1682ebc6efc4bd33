//! 压缩 + 近似重复检测的结果缓存
//!
//! 写入时，序列化结果超过阈值会尝试 zstd 压缩，节省不足时仍存原文。
//! 精确键未命中时，按结构指纹前缀找候选条目打分，达到阈值即复用候选结果，
//! 并在新键下写入指向候选键的引用记录。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::backend::CacheStore;
use crate::cache::cache_impl::{serialize_result, EntryStore};
use crate::cache::entry::{CacheEntry, EntryMetadata};
use crate::cache::fingerprint::{Fingerprinter, PositionalScorer, SimilarityScorer};
use crate::cache::key::cache_key;
use crate::cache::stats_collector::CacheStats;
use crate::cache::traits::{CacheHit, HitSource, ResultCache, SetOptions};
use crate::config::CacheConfig;
use crate::core::error::{CoreResult, QueryError};
use crate::core::types::{ParamMap, QueryLanguage, QueryResult};

pub struct CompressedResultCache {
    entries: EntryStore,
    fingerprinter: Fingerprinter,
    scorer: Box<dyn SimilarityScorer>,
    compression_threshold: usize,
    max_compressed_ratio: f64,
    compression_level: i32,
    similarity_threshold: f64,
}

impl CompressedResultCache {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            entries: EntryStore::new(store, config),
            fingerprinter: Fingerprinter::new(config.fingerprint_shape_len, config.fingerprint_prefix_len),
            scorer: Box::new(PositionalScorer),
            compression_threshold: config.compression_threshold_bytes,
            max_compressed_ratio: 1.0 - config.min_compression_savings,
            compression_level: config.compression_level,
            similarity_threshold: config.similarity_threshold,
        }
    }

    /// 替换相似度打分器
    pub fn with_scorer(mut self, scorer: Box<dyn SimilarityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// 按大小与节省比例决定是否压缩，返回条目与节省的字节数
    fn build_entry(&self, json: Vec<u8>, hash: String, metadata: EntryMetadata) -> CoreResult<(CacheEntry, u64)> {
        if json.len() <= self.compression_threshold {
            return Ok((CacheEntry::inline(json, hash, metadata), 0));
        }

        let compressed = zstd::stream::encode_all(json.as_slice(), self.compression_level)
            .map_err(|e| QueryError::Cache(format!("压缩缓存条目失败: {}", e)))?;
        if compressed.len() as f64 <= json.len() as f64 * self.max_compressed_ratio {
            let saved = (json.len() - compressed.len()) as u64;
            log::debug!(
                "缓存结果已压缩: {} -> {} 字节",
                json.len(),
                compressed.len()
            );
            Ok((CacheEntry::compressed(compressed, json.len(), hash, metadata), saved))
        } else {
            Ok((CacheEntry::inline(json, hash, metadata), 0))
        }
    }

    /// 在指纹桶中寻找可复用的条目
    async fn find_similar(&self, key: &str, fingerprint: &str) -> CoreResult<Option<CacheHit>> {
        let store = self.entries.store();
        let bucket = self
            .entries
            .keys()
            .fingerprint_bucket(self.fingerprinter.prefix(fingerprint));

        for member in store.set_members(&bucket).await? {
            let Some((candidate_fp, candidate_key)) = member.split_once('|') else {
                store.set_remove(&bucket, &member).await?;
                continue;
            };
            if candidate_key == key {
                continue;
            }
            let score = self.scorer.score(fingerprint, candidate_fp);
            if score < self.similarity_threshold {
                continue;
            }

            let candidate = match self.entries.load(candidate_key).await? {
                Some(candidate) if !candidate.is_reference() => candidate,
                _ => {
                    store.set_remove(&bucket, &member).await?;
                    continue;
                }
            };
            let Some(remaining) = candidate.metadata.remaining_ttl() else {
                continue;
            };

            let result = candidate.decode_result()?;
            let mut metadata = EntryMetadata::new(
                candidate.metadata.tags.clone(),
                remaining,
                candidate.metadata.execution_time_ms,
            );
            metadata.fingerprint = Some(fingerprint.to_string());
            metadata.record_hit();
            let reference = CacheEntry::reference(candidate_key, &candidate, metadata);
            self.entries.write(key, &reference, remaining).await?;
            self.entries.stats().record_dedup_reference();

            log::debug!(
                "近似重复命中: {} 复用 {} (相似度 {:.3})",
                key,
                candidate_key,
                score
            );
            return Ok(Some(CacheHit {
                key: key.to_string(),
                result,
                metadata: reference.metadata,
                source: HitSource::Similar,
            }));
        }
        Ok(None)
    }

    async fn lookup(&self, language: QueryLanguage, query: &str, params: &ParamMap) -> CoreResult<Option<CacheHit>> {
        let key = cache_key(language, query, params);
        if let Some(hit) = self.entries.lookup(&key).await? {
            return Ok(Some(hit));
        }
        let fingerprint = self.fingerprinter.fingerprint(query, params);
        self.find_similar(&key, &fingerprint).await
    }

    async fn store_result(
        &self,
        key: &str,
        query: &str,
        result: &QueryResult,
        options: SetOptions,
        params: &ParamMap,
        execution_time_ms: u64,
    ) -> CoreResult<u64> {
        let ttl = self.entries.ttl_or_default(options.ttl);
        let fingerprint = self.fingerprinter.fingerprint(query, params);
        let (json, hash) = serialize_result(result)?;

        let mut metadata = EntryMetadata::new(options.tags, ttl, execution_time_ms);
        metadata.fingerprint = Some(fingerprint.clone());
        let (entry, saved) = self.build_entry(json, hash, metadata)?;
        self.entries.write(key, &entry, ttl).await?;

        let keys = self.entries.keys();
        let bucket = keys.fingerprint_bucket(self.fingerprinter.prefix(&fingerprint));
        let store = self.entries.store();
        store
            .set_add(&bucket, &format!("{}|{}", fingerprint, key))
            .await?;
        store.set_add(&keys.bucket_registry(), &bucket).await?;
        Ok(saved)
    }
}

#[async_trait]
impl ResultCache for CompressedResultCache {
    async fn get(
        &self,
        language: QueryLanguage,
        query: &str,
        params: &ParamMap,
    ) -> CoreResult<Option<CacheHit>> {
        let started = Instant::now();
        let outcome = self.lookup(language, query, params).await;
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
        let outcome = self
            .store_result(&key, query, result, options, params, execution_time_ms)
            .await;
        self.entries.observe(started, &outcome);

        self.entries.stats().record_set(outcome?);
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

impl std::fmt::Debug for CompressedResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedResultCache")
            .field("entries", &self.entries)
            .field("scorer", &self.scorer)
            .field("compression_threshold", &self.compression_threshold)
            .field("similarity_threshold", &self.similarity_threshold)
            .finish()
    }
}

//! 缓存实现模块
//!
//! - `plain`：精确键缓存
//! - `compressed`：大结果压缩 + 近似重复检测
//!
//! 两种实现共享 `EntryStore` 完成条目读写、标签索引与清理。

pub mod compressed;
pub mod plain;

pub use compressed::CompressedResultCache;
pub use plain::PlainResultCache;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::CacheStore;
use crate::cache::entry::{CacheEntry, CachePayload};
use crate::cache::key::{sha256_hex, KeySpace};
use crate::cache::stats_collector::{CacheStats, CacheStatsCollector};
use crate::cache::traits::{CacheHit, HitSource};
use crate::config::CacheConfig;
use crate::core::error::{CoreResult, QueryError};
use crate::core::types::QueryResult;

/// 序列化结果并计算内容摘要
pub(crate) fn serialize_result(result: &QueryResult) -> CoreResult<(Vec<u8>, String)> {
    let json = serde_json::to_vec(result)
        .map_err(|e| QueryError::Cache(format!("序列化查询结果失败: {}", e)))?;
    let hash = sha256_hex(&json);
    Ok((json, hash))
}

pub(crate) struct EntryStore {
    store: Arc<dyn CacheStore>,
    keys: KeySpace,
    default_ttl: Duration,
    stats: CacheStatsCollector,
}

impl EntryStore {
    pub(crate) fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            keys: KeySpace::new(config.key_prefix.clone()),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            stats: CacheStatsCollector::new(config.latency_history),
        }
    }

    pub(crate) fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub(crate) fn store(&self) -> &dyn CacheStore {
        self.store.as_ref()
    }

    pub(crate) fn stats(&self) -> &CacheStatsCollector {
        &self.stats
    }

    pub(crate) fn ttl_or_default(&self, ttl: Option<Duration>) -> Duration {
        ttl.unwrap_or(self.default_ttl)
    }

    /// 读取条目；已过期的条目会被删除并视为不存在，损坏的条目会被删除并报错
    pub(crate) async fn load(&self, key: &str) -> CoreResult<Option<CacheEntry>> {
        let stored_key = self.keys.entry(key);
        let Some(bytes) = self.store.get(&stored_key).await? else {
            return Ok(None);
        };

        let entry = match CacheEntry::decode(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                self.store.delete(&stored_key).await?;
                return Err(e);
            }
        };
        if entry.metadata.remaining_ttl().is_none() {
            self.store.delete(&stored_key).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// 写入条目并登记标签
    pub(crate) async fn write(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> CoreResult<()> {
        self.store
            .set_with_ttl(&self.keys.entry(key), entry.encode()?, ttl)
            .await?;
        for tag in &entry.metadata.tags {
            self.store.set_add(&self.keys.tag(tag), key).await?;
            self.store.set_add(&self.keys.tag_registry(), tag).await?;
        }
        Ok(())
    }

    /// 记一次命中并写回，保留剩余 TTL
    async fn touch(&self, key: &str, entry: &mut CacheEntry) -> CoreResult<()> {
        entry.metadata.record_hit();
        let written = self
            .store
            .set_keep_ttl(&self.keys.entry(key), entry.encode()?)
            .await?;
        if !written {
            log::debug!("缓存条目在命中后已过期: {}", key);
        }
        Ok(())
    }

    /// 精确键查找，引用记录只解析一跳；悬空引用被删除并视为未命中
    pub(crate) async fn lookup(&self, key: &str) -> CoreResult<Option<CacheHit>> {
        let Some(mut entry) = self.load(key).await? else {
            return Ok(None);
        };

        let (result, source) = match &entry.payload {
            CachePayload::Reference { key: target_key } => {
                let target = match self.load(target_key).await? {
                    Some(target) if !target.is_reference() => target,
                    _ => {
                        log::debug!("引用记录 {} 指向的条目 {} 已不存在", key, target_key);
                        self.store.delete(&self.keys.entry(key)).await?;
                        return Ok(None);
                    }
                };
                (target.decode_result()?, HitSource::Reference)
            }
            _ => (entry.decode_result()?, HitSource::Exact),
        };

        self.touch(key, &mut entry).await?;
        Ok(Some(CacheHit {
            key: key.to_string(),
            result,
            metadata: entry.metadata,
            source,
        }))
    }

    pub(crate) async fn exists(&self, key: &str) -> CoreResult<bool> {
        Ok(self.load(key).await?.is_some())
    }

    pub(crate) async fn invalidate_by_tags(&self, tags: &[String]) -> CoreResult<usize> {
        let mut removed = HashSet::new();
        for tag in tags {
            let tag_set = self.keys.tag(tag);
            for member in self.store.set_members(&tag_set).await? {
                if self.store.delete(&self.keys.entry(&member)).await? {
                    removed.insert(member.clone());
                }
                self.store.set_remove(&tag_set, &member).await?;
            }
            self.store.set_remove(&self.keys.tag_registry(), tag).await?;
        }

        if !removed.is_empty() {
            self.notify(&format!("tags:{}", tags.join(","))).await;
        }
        log::info!("按标签 {:?} 失效缓存条目 {} 个", tags, removed.len());
        Ok(removed.len())
    }

    /// 删除所有条目、标签索引与指纹桶
    pub(crate) async fn clear(&self) -> CoreResult<usize> {
        let mut removed = 0;
        for stored_key in self.store.scan_prefix(&self.keys.entries_prefix()).await? {
            if self.store.delete(&stored_key).await? {
                removed += 1;
            }
        }

        let tag_registry = self.keys.tag_registry();
        for tag in self.store.set_members(&tag_registry).await? {
            self.drain_set(&self.keys.tag(&tag)).await?;
            self.store.set_remove(&tag_registry, &tag).await?;
        }
        let bucket_registry = self.keys.bucket_registry();
        for bucket in self.store.set_members(&bucket_registry).await? {
            self.drain_set(&bucket).await?;
            self.store.set_remove(&bucket_registry, &bucket).await?;
        }

        self.notify("all").await;
        log::info!("清空结果缓存，删除条目 {} 个", removed);
        Ok(removed)
    }

    async fn drain_set(&self, set: &str) -> CoreResult<()> {
        for member in self.store.set_members(set).await? {
            self.store.set_remove(set, &member).await?;
        }
        Ok(())
    }

    async fn notify(&self, message: &str) {
        if let Err(e) = self
            .store
            .publish(&self.keys.invalidation_channel(), message)
            .await
        {
            log::warn!("发布缓存失效通知失败: {}", e);
        }
    }

    /// 条目数与存储字节数
    pub(crate) async fn usage(&self) -> CoreResult<(u64, u64)> {
        let mut count = 0;
        let mut size = 0;
        for stored_key in self.store.scan_prefix(&self.keys.entries_prefix()).await? {
            if let Some(bytes) = self.store.get(&stored_key).await? {
                count += 1;
                size += bytes.len() as u64;
            }
        }
        Ok((count, size))
    }

    pub(crate) async fn snapshot(&self) -> CoreResult<CacheStats> {
        let (count, size) = self.usage().await?;
        Ok(self.stats.snapshot(count, size))
    }

    /// 统计一次操作的结果与耗时
    pub(crate) fn observe<T>(&self, started: Instant, outcome: &CoreResult<T>) {
        self.stats.record_latency(started.elapsed());
        if let Err(e) = outcome {
            self.stats.record_error();
            log::warn!("缓存操作失败: {}", e);
        }
    }
}

impl std::fmt::Debug for EntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryStore")
            .field("keys", &self.keys)
            .field("default_ttl", &self.default_ttl)
            .field("stats", &self.stats)
            .finish()
    }
}

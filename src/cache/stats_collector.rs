//! 缓存统计收集器
//!
//! 计数器由收集器累加；条目数与总大小在读取统计时从存储中计算

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// 缓存统计信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub sets: u64,
    /// 通过近似重复命中写入的引用记录数
    pub dedup_references: u64,
    /// 压缩节省的字节数
    pub compression_savings_bytes: u64,
    pub entry_count: u64,
    pub total_size_bytes: u64,
    /// 最近操作耗时（毫秒），旧的在前
    pub recent_latencies_ms: Vec<f64>,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.recent_latencies_ms.is_empty() {
            0.0
        } else {
            self.recent_latencies_ms.iter().sum::<f64>() / self.recent_latencies_ms.len() as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn merge(&mut self, other: &CacheStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.errors += other.errors;
        self.sets += other.sets;
        self.dedup_references += other.dedup_references;
        self.compression_savings_bytes += other.compression_savings_bytes;
        self.entry_count += other.entry_count;
        self.total_size_bytes += other.total_size_bytes;
        self.recent_latencies_ms
            .extend_from_slice(&other.recent_latencies_ms);
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    errors: u64,
    sets: u64,
    dedup_references: u64,
    compression_savings_bytes: u64,
    latencies: VecDeque<f64>,
}

/// 缓存统计收集器
#[derive(Clone)]
pub struct CacheStatsCollector {
    counters: Arc<RwLock<Counters>>,
    latency_history: usize,
}

impl CacheStatsCollector {
    pub fn new(latency_history: usize) -> Self {
        Self {
            counters: Arc::new(RwLock::new(Counters::default())),
            latency_history: latency_history.max(1),
        }
    }

    pub fn record_hit(&self) {
        self.counters.write().hits += 1;
    }

    pub fn record_miss(&self) {
        self.counters.write().misses += 1;
    }

    pub fn record_error(&self) {
        self.counters.write().errors += 1;
    }

    pub fn record_set(&self, saved_bytes: u64) {
        let mut counters = self.counters.write();
        counters.sets += 1;
        counters.compression_savings_bytes += saved_bytes;
    }

    pub fn record_dedup_reference(&self) {
        self.counters.write().dedup_references += 1;
    }

    pub fn record_latency(&self, elapsed: Duration) {
        let mut counters = self.counters.write();
        if counters.latencies.len() == self.latency_history {
            counters.latencies.pop_front();
        }
        counters.latencies.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    /// 合并计数器与存储侧的条目统计
    pub fn snapshot(&self, entry_count: u64, total_size_bytes: u64) -> CacheStats {
        let counters = self.counters.read();
        CacheStats {
            hits: counters.hits,
            misses: counters.misses,
            errors: counters.errors,
            sets: counters.sets,
            dedup_references: counters.dedup_references,
            compression_savings_bytes: counters.compression_savings_bytes,
            entry_count,
            total_size_bytes,
            recent_latencies_ms: counters.latencies.iter().copied().collect(),
        }
    }

    pub fn reset_stats(&self) {
        *self.counters.write() = Counters::default();
    }
}

impl Default for CacheStatsCollector {
    fn default() -> Self {
        Self::new(100)
    }
}

impl std::fmt::Debug for CacheStatsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counters = self.counters.read();
        f.debug_struct("CacheStatsCollector")
            .field("hits", &counters.hits)
            .field("misses", &counters.misses)
            .field("errors", &counters.errors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_basic() {
        let collector = CacheStatsCollector::new(10);
        collector.record_hit();
        collector.record_miss();
        collector.record_error();
        collector.record_set(512);
        collector.record_dedup_reference();

        let stats = collector.snapshot(3, 2048);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.compression_savings_bytes, 512);
        assert_eq!(stats.dedup_references, 1);
        assert_eq!(stats.entry_count, 3);
        assert_eq!(stats.total_size_bytes, 2048);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_latency_ring_is_bounded() {
        let collector = CacheStatsCollector::new(3);
        for ms in 1..=5 {
            collector.record_latency(Duration::from_millis(ms));
        }
        let stats = collector.snapshot(0, 0);
        assert_eq!(stats.recent_latencies_ms, vec![3.0, 4.0, 5.0]);
        assert_eq!(stats.average_latency_ms(), 4.0);
    }

    #[test]
    fn test_reset_and_merge() {
        let collector = CacheStatsCollector::default();
        collector.record_hit();
        collector.reset_stats();
        assert_eq!(collector.snapshot(0, 0), CacheStats::new());

        let mut a = CacheStats {
            hits: 2,
            entry_count: 1,
            ..CacheStats::default()
        };
        a.merge(&CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        });
        assert_eq!(a.hits, 5);
        assert_eq!(a.misses, 1);
        assert_eq!(a.entry_count, 1);
        a.reset();
        assert_eq!(a.hits, 0);
    }
}

//! 编排层统计

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::cache::CacheStats;
use crate::query::optimizer::{OptimizerStatsSnapshot, PlanCacheStats};

/// 编排层计数器
#[derive(Debug, Default)]
pub struct ServiceStats {
    jobs: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_errors: AtomicU64,
    parallel_runs: AtomicU64,
    parallel_fallbacks: AtomicU64,
    sequential_runs: AtomicU64,
    single_flight_joins: AtomicU64,
}

/// 某一时刻的计数器值
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStatsSnapshot {
    pub jobs: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_errors: u64,
    pub parallel_runs: u64,
    pub parallel_fallbacks: u64,
    pub sequential_runs: u64,
    pub single_flight_joins: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEvent {
    Job,
    Failure,
    CacheHit,
    CacheMiss,
    CacheError,
    ParallelRun,
    ParallelFallback,
    SequentialRun,
    SingleFlightJoin,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, event: ServiceEvent) -> &AtomicU64 {
        match event {
            ServiceEvent::Job => &self.jobs,
            ServiceEvent::Failure => &self.failures,
            ServiceEvent::CacheHit => &self.cache_hits,
            ServiceEvent::CacheMiss => &self.cache_misses,
            ServiceEvent::CacheError => &self.cache_errors,
            ServiceEvent::ParallelRun => &self.parallel_runs,
            ServiceEvent::ParallelFallback => &self.parallel_fallbacks,
            ServiceEvent::SequentialRun => &self.sequential_runs,
            ServiceEvent::SingleFlightJoin => &self.single_flight_joins,
        }
    }

    pub fn record(&self, event: ServiceEvent) {
        self.counter(event).fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServiceStatsSnapshot {
        let get = |event| self.counter(event).load(Ordering::Relaxed);
        ServiceStatsSnapshot {
            jobs: get(ServiceEvent::Job),
            failures: get(ServiceEvent::Failure),
            cache_hits: get(ServiceEvent::CacheHit),
            cache_misses: get(ServiceEvent::CacheMiss),
            cache_errors: get(ServiceEvent::CacheError),
            parallel_runs: get(ServiceEvent::ParallelRun),
            parallel_fallbacks: get(ServiceEvent::ParallelFallback),
            sequential_runs: get(ServiceEvent::SequentialRun),
            single_flight_joins: get(ServiceEvent::SingleFlightJoin),
        }
    }

    pub fn reset(&self) {
        for event in [
            ServiceEvent::Job,
            ServiceEvent::Failure,
            ServiceEvent::CacheHit,
            ServiceEvent::CacheMiss,
            ServiceEvent::CacheError,
            ServiceEvent::ParallelRun,
            ServiceEvent::ParallelFallback,
            ServiceEvent::SequentialRun,
            ServiceEvent::SingleFlightJoin,
        ] {
            self.counter(event).store(0, Ordering::Relaxed);
        }
    }
}

/// `get_stats` 的汇总结果
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceReport {
    pub service: ServiceStatsSnapshot,
    pub optimizer: OptimizerStatsSnapshot,
    pub plan_cache: PlanCacheStats,
    /// 未启用缓存，或读取缓存统计失败时为空
    pub cache: Option<CacheStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_snapshot_reset() {
        let stats = ServiceStats::new();
        stats.record(ServiceEvent::Job);
        stats.record(ServiceEvent::Job);
        stats.record(ServiceEvent::ParallelFallback);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.jobs, 2);
        assert_eq!(snapshot.parallel_fallbacks, 1);
        assert_eq!(snapshot.failures, 0);

        stats.reset();
        assert_eq!(stats.snapshot(), ServiceStatsSnapshot::default());
    }
}

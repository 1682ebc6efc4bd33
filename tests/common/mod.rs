//! 集成测试共享工具模块
//!
//! 提供内存后端、测试作业和服务构建等辅助函数，供所有集成测试使用

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};

use querycore::backend::{
    CacheStore, MemoryRelationalBackend, MemorySearchBackend, MemoryStore, PlanNode, RowSet,
    SearchBackend,
};
use querycore::config::Config;
use querycore::core::types::{QueryJob, QueryLanguage, Row, TimeRange};
use querycore::core::QueryError;
use querycore::query::planner::range_condition;
use querycore::QueryExecutionService;

/// 高代价执行计划：按默认换算系数预估约 10 秒
pub const EXPENSIVE_COST: f64 = 1_000_000.0;

/// 聚合查询，用于时间分区场景
pub const HOST_COUNTS: &str = "SELECT host, COUNT(*) AS hits FROM events GROUP BY host";

pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

pub fn host_rows(hosts: &[(&str, i64)]) -> Vec<Row> {
    hosts
        .iter()
        .map(|(host, hits)| row(json!({"host": host, "hits": hits})))
        .collect()
}

pub fn docs(prefix: &str, n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| row(json!({"id": format!("{}-{}", prefix, i), "level": "error"})))
        .collect()
}

/// 三天前结束、跨度为 `hours` 小时的时间范围
pub fn past_range(hours: i64) -> TimeRange {
    let end = Utc::now() - ChronoDuration::days(3);
    TimeRange::new(end - ChronoDuration::hours(hours), end).unwrap()
}

pub fn sql_job(query: &str) -> QueryJob {
    QueryJob::new(query, QueryLanguage::Sql)
}

/// 分区子查询带有注入的时间谓词
pub fn is_segment_query(sql: &str) -> bool {
    sql.contains("timestamp >= '")
}

/// 整体查询返回三行，每个分区子查询返回两行
pub fn partition_aware_backend() -> MemoryRelationalBackend {
    MemoryRelationalBackend::new(|sql, _| {
        if is_segment_query(sql) {
            Ok(RowSet::from_rows(host_rows(&[("a", 1), ("b", 2)])))
        } else {
            Ok(RowSet::from_rows(host_rows(&[("a", 5), ("b", 10), ("c", 1)])))
        }
    })
    .with_explain(|_| Ok(PlanNode::new("Seq Scan", EXPENSIVE_COST, 50_000.0)))
}

/// 只有覆盖整个 `range` 的查询能成功，任何更窄的分区子查询都失败
pub fn segment_failing_backend(range: &TimeRange) -> MemoryRelationalBackend {
    let full = range_condition("timestamp", range);
    MemoryRelationalBackend::new(move |sql, _| {
        if is_segment_query(sql) && !sql.contains(&full) {
            Err(QueryError::Backend("分区查询超时".to_string()))
        } else {
            Ok(RowSet::from_rows(host_rows(&[("a", 5), ("b", 10), ("c", 1)])))
        }
    })
    .with_explain(|_| Ok(PlanNode::new("Seq Scan", EXPENSIVE_COST, 50_000.0)))
}

fn quoted_after<'a>(sql: &'a str, marker: &str) -> Option<&'a str> {
    let rest = &sql[sql.find(marker)? + marker.len()..];
    rest.split('\'').next()
}

/// 查询中 `timestamp >= '..' AND timestamp < '..'` 的上下界
pub fn query_bounds(sql: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let parse = |s: &str| DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc));
    let lower = parse(quoted_after(sql, "timestamp >= '")?)?;
    let upper = parse(quoted_after(sql, "timestamp < '")?)?;
    Some((lower, upper))
}

/// 每半小时一条事件，从 `range` 开始前两小时到结束后两小时，事件时间与分区边界错开一刻钟
///
/// 查询带时间谓词时只返回落在区间内的事件，否则返回全部事件
pub fn timeline_backend(range: &TimeRange) -> MemoryRelationalBackend {
    let first = range.start - ChronoDuration::hours(2) + ChronoDuration::minutes(15);
    let events: Vec<DateTime<Utc>> = (0..28)
        .map(|k| first + ChronoDuration::minutes(30 * k))
        .collect();
    MemoryRelationalBackend::new(move |sql, _| {
        let bounds = query_bounds(sql);
        let rows = events
            .iter()
            .filter(|at| bounds.map_or(true, |(lo, hi)| **at >= lo && **at < hi))
            .map(|at| row(json!({"host": "fw-1", "at": at.timestamp_millis()})))
            .collect();
        Ok(RowSet::from_rows(rows))
    })
    .with_explain(|_| Ok(PlanNode::new("Seq Scan", EXPENSIVE_COST, 50_000.0)))
}

pub fn slow(backend: MemoryRelationalBackend, millis: u64) -> MemoryRelationalBackend {
    backend.with_latency(Duration::from_millis(millis))
}

pub fn log_indices() -> MemorySearchBackend {
    MemorySearchBackend::new()
        .with_index("logs-2024.01.01", docs("a", 2))
        .with_index("logs-2024.01.02", docs("b", 2))
        .with_index("logs-2024.01.03", docs("c", 2))
}

pub fn testing_config(max_concurrency: usize) -> Config {
    let mut config = Config::testing();
    config.execution.max_concurrency = max_concurrency;
    config
}

/// 服务及其内存依赖
pub struct TestHarness {
    pub service: Arc<QueryExecutionService>,
    pub relational: MemoryRelationalBackend,
    pub store: Arc<MemoryStore>,
}

impl TestHarness {
    pub fn new(config: &Config, relational: MemoryRelationalBackend) -> Self {
        Self::with_search(config, relational, None)
    }

    pub fn with_search(
        config: &Config,
        relational: MemoryRelationalBackend,
        search: Option<MemorySearchBackend>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let search: Option<Arc<dyn SearchBackend>> = match search {
            Some(search) => Some(Arc::new(search)),
            None => None,
        };
        let cache_store: Arc<dyn CacheStore> = store.clone();
        let service = QueryExecutionService::new(
            config,
            Arc::new(relational.clone()),
            search,
            Some(cache_store),
        )
        .unwrap();
        Self {
            service: Arc::new(service),
            relational,
            store,
        }
    }

    /// 后端实际执行过的查询条数
    pub fn executed(&self) -> usize {
        self.relational.stats().queries_executed
    }
}

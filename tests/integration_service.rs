//! 查询执行服务集成测试
//!
//! 在内存后端上走完整流程：缓存检查、验证、优化、并行判定、执行、写缓存

mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use querycore::backend::MemoryRelationalBackend;
use querycore::cache::WarmUpQuery;
use querycore::core::types::{ParamMap, QueryLanguage, Row};
use querycore::core::QueryError;
use querycore::query::planner::{inject_condition, range_condition};
use querycore::QueryJob;

use common::*;

#[tokio::test]
async fn test_expensive_time_range_job_runs_in_parallel() {
    let h = TestHarness::new(&testing_config(8), partition_aware_backend());
    let job = sql_job(HOST_COUNTS).with_time_range(past_range(10));

    let result = h.service.execute_query(&job, None).await.unwrap();
    assert_eq!(result.job_id, job.id);
    assert!(result.flag("parallel_execution"));
    assert!(!result.flag("cache_hit"));
    assert_eq!(result.metadata["subquery_count"], 5);
    assert_eq!(result.metadata["merge_strategy"], "union");
    assert_eq!(result.data.len(), 10);
    assert_eq!(h.executed(), 5);
    assert!(h
        .relational
        .executed_queries()
        .iter()
        .all(|sql| is_segment_query(sql)));

    let stats = h.service.get_stats().await.service;
    assert_eq!(stats.parallel_runs, 1);
    assert_eq!(stats.sequential_runs, 0);
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let h = TestHarness::new(&testing_config(8), partition_aware_backend());
    let job = sql_job(HOST_COUNTS).with_time_range(past_range(10));

    let first = h.service.execute_query(&job, None).await.unwrap();
    let again = job.clone().with_id("second");
    let second = h.service.execute_query(&again, None).await.unwrap();

    assert!(second.flag("cache_hit"));
    assert_eq!(second.job_id, "second");
    assert_eq!(second.data, first.data);
    assert_eq!(h.executed(), 5);

    let report = h.service.get_stats().await;
    assert_eq!(report.service.cache_hits, 1);
    assert_eq!(report.service.cache_misses, 1);
    let cache = report.cache.unwrap();
    assert_eq!(cache.hits, 1);
    assert_eq!(cache.entry_count, 1);
}

#[tokio::test]
async fn test_failed_parallel_run_falls_back_to_sequential_result() {
    let range = past_range(10);
    let h = TestHarness::new(&testing_config(8), segment_failing_backend(&range));
    let job = sql_job(HOST_COUNTS).with_time_range(range);
    let result = h.service.execute_query(&job, None).await.unwrap();

    let mut sequential_config = testing_config(8);
    sequential_config.execution.enable_parallel = false;
    let reference = TestHarness::new(&sequential_config, segment_failing_backend(&range));
    let expected = reference.service.execute_query(&job, None).await.unwrap();

    assert_eq!(result.data, expected.data);
    assert_eq!(result.data.len(), 3);
    assert!(!result.flag("parallel_execution"));
    let bounded = inject_condition(HOST_COUNTS, &range_condition("timestamp", &range));
    assert_eq!(h.relational.executed_queries().last(), Some(&bounded));
    assert_eq!(reference.relational.executed_queries(), vec![bounded]);

    let stats = h.service.get_stats().await.service;
    assert_eq!(stats.parallel_fallbacks, 1);
    assert_eq!(stats.sequential_runs, 1);
    assert_eq!(stats.failures, 0);
}

#[tokio::test]
async fn test_parallel_and_sequential_runs_see_same_time_window() {
    let range = past_range(10);
    let job = sql_job("SELECT host, at FROM events").with_time_range(range);

    let fanned_out = TestHarness::new(&testing_config(8), timeline_backend(&range));
    let mut sequential_config = testing_config(8);
    sequential_config.execution.enable_parallel = false;
    let single = TestHarness::new(&sequential_config, timeline_backend(&range));

    let parallel = fanned_out.service.execute_query(&job, None).await.unwrap();
    let sequential = single.service.execute_query(&job, None).await.unwrap();
    assert!(parallel.flag("parallel_execution"));
    assert!(!sequential.flag("parallel_execution"));
    assert_eq!(fanned_out.executed(), 5);
    assert_eq!(single.executed(), 1);

    let instants = |rows: &[Row]| {
        let mut at: Vec<i64> = rows.iter().filter_map(|r| r["at"].as_i64()).collect();
        at.sort_unstable();
        at
    };
    assert_eq!(parallel.data.len(), 20);
    assert_eq!(instants(&parallel.data), instants(&sequential.data));
}

#[tokio::test]
async fn test_cheap_job_reports_every_stage() {
    let h = TestHarness::new(&testing_config(4), MemoryRelationalBackend::from_rows(host_rows(&[("a", 1)])));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let progress = {
        let seen = Arc::clone(&seen);
        move |pct: u8, _: &str| seen.lock().push(pct)
    };

    let result = h
        .service
        .execute_query(&sql_job("SELECT host FROM events"), Some(&progress))
        .await
        .unwrap();
    assert!(!result.flag("parallel_execution"));
    assert_eq!(*seen.lock(), vec![0, 5, 15, 25, 35, 50, 90, 100]);
}

#[tokio::test]
async fn test_destructive_query_is_rejected_before_execution() {
    let h = TestHarness::new(&testing_config(4), partition_aware_backend());
    let report = h.service.validate_query(QueryLanguage::Sql, "DROP TABLE users").await;
    assert!(!report.valid);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let progress = {
        let seen = Arc::clone(&seen);
        move |pct: u8, msg: &str| seen.lock().push((pct, msg.to_string()))
    };
    let outcome = h
        .service
        .execute_query(&sql_job("DROP TABLE users"), Some(&progress))
        .await;

    assert!(matches!(outcome, Err(QueryError::Validation(_))));
    assert_eq!(h.executed(), 0);
    assert_eq!(h.service.get_stats().await.service.failures, 1);
    let seen = seen.lock();
    let (pct, msg) = seen.last().unwrap();
    assert_eq!(*pct, 100);
    assert!(msg.starts_with("失败"));
}

#[tokio::test]
async fn test_concurrent_identical_jobs_execute_once() {
    let backend = slow(MemoryRelationalBackend::from_rows(host_rows(&[("a", 1), ("b", 2)])), 150);
    let h = TestHarness::new(&testing_config(4), backend);

    let mut handles = Vec::new();
    for i in 0..4 {
        let service = Arc::clone(&h.service);
        let job = sql_job("SELECT host, hits FROM summary").with_id(format!("job-{}", i));
        handles.push(tokio::spawn(async move { service.execute_query(&job, None).await }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }
    assert_eq!(h.executed(), 1);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.job_id, format!("job-{}", i));
        assert_eq!(result.data.len(), 2);
    }

    let stats = h.service.get_stats().await.service;
    assert_eq!(stats.jobs, 4);
    assert_eq!(stats.single_flight_joins + stats.cache_hits, 3);
}

#[tokio::test]
async fn test_realtime_job_bypasses_cache() {
    let h = TestHarness::new(&testing_config(4), MemoryRelationalBackend::from_rows(host_rows(&[("a", 1)])));
    let job = sql_job("SELECT host FROM live").with_metadata("realtime", true);

    h.service.execute_query(&job, None).await.unwrap();
    let second = h.service.execute_query(&job, None).await.unwrap();
    assert!(!second.flag("cache_hit"));
    assert_eq!(h.executed(), 2);
    assert_eq!(h.service.get_stats().await.cache.unwrap().entry_count, 0);
}

#[tokio::test]
async fn test_case_differing_literals_run_their_own_text() {
    let h = TestHarness::new(&testing_config(4), MemoryRelationalBackend::from_rows(host_rows(&[("a", 1)])));
    let jobs = [
        QueryJob::new("from alerts host:FW", QueryLanguage::Dsl),
        QueryJob::new("from alerts host:fw", QueryLanguage::Dsl),
        sql_job("SELECT * FROM e WHERE 1=1 AND host = 'FW'"),
        sql_job("SELECT * FROM e WHERE 1=1 AND host = 'fw'"),
    ];
    for job in &jobs {
        let job = job.clone().with_metadata("realtime", true);
        h.service.execute_query(&job, None).await.unwrap();
    }

    let executed = h.relational.executed_queries();
    assert_eq!(executed.len(), 4);
    assert_eq!(executed[0], "SELECT * FROM alerts WHERE host = 'FW' LIMIT 10000");
    assert_eq!(executed[1], "SELECT * FROM alerts WHERE host = 'fw' LIMIT 10000");
    assert_eq!(executed[2], "SELECT * FROM e WHERE host = 'FW'");
    assert_eq!(executed[3], "SELECT * FROM e WHERE 1=1 AND host = 'fw'");
}

#[tokio::test]
async fn test_dsl_job_executes_translated_sql() {
    let h = TestHarness::new(&testing_config(4), MemoryRelationalBackend::from_rows(host_rows(&[("a", 1)])));
    let job = QueryJob::new("from alerts severity:high limit 5", QueryLanguage::Dsl);

    let result = h.service.execute_query(&job, None).await.unwrap();
    assert_eq!(result.data.len(), 1);
    let executed = h.relational.executed_queries();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].starts_with("SELECT * FROM alerts WHERE severity = 'high'"));
    assert!(executed[0].ends_with("LIMIT 5"));
}

#[tokio::test]
async fn test_wildcard_search_runs_one_subquery_per_index() {
    let h = TestHarness::with_search(&testing_config(8), partition_aware_backend(), Some(log_indices()));
    let job = QueryJob::new("logs-*", QueryLanguage::SearchIndex);

    let estimate = h
        .service
        .estimate_duration(QueryLanguage::SearchIndex, "logs-*", &ParamMap::new())
        .await;
    assert_eq!(estimate, 6_000);

    let result = h.service.execute_query(&job, None).await.unwrap();
    assert!(result.flag("parallel_execution"));
    assert_eq!(result.metadata["subquery_count"], 3);
    assert_eq!(result.data.len(), 6);
    assert_eq!(h.executed(), 0);
}

#[tokio::test]
async fn test_estimate_duration_uses_plan_cost() {
    let h = TestHarness::new(&testing_config(4), partition_aware_backend());
    let params = ParamMap::new();
    assert_eq!(
        h.service.estimate_duration(QueryLanguage::Sql, HOST_COUNTS, &params).await,
        10_000
    );
    assert_eq!(
        h.service.estimate_duration(QueryLanguage::Dsl, "limit many", &params).await,
        0
    );
}

#[tokio::test]
async fn test_warm_up_executes_only_cold_queries() {
    let h = TestHarness::new(&testing_config(4), MemoryRelationalBackend::from_rows(host_rows(&[("a", 1)])));
    h.service
        .execute_query(&sql_job("SELECT host FROM warm"), None)
        .await
        .unwrap();

    let summary = h
        .service
        .warm_up_cache(&[
            WarmUpQuery::new(QueryLanguage::Sql, "SELECT host FROM warm"),
            WarmUpQuery::new(QueryLanguage::Sql, "SELECT host FROM cold"),
            WarmUpQuery::new(QueryLanguage::Sql, "DROP TABLE cold"),
        ])
        .await
        .unwrap();
    assert_eq!(summary.already_cached, 1);
    assert_eq!(summary.executed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(h.executed(), 2);

    let cached = h
        .service
        .execute_query(&sql_job("SELECT host FROM cold"), None)
        .await
        .unwrap();
    assert!(cached.flag("cache_hit"));
}

#[tokio::test]
async fn test_clear_cache_by_tag_and_fully() {
    let h = TestHarness::new(&testing_config(4), MemoryRelationalBackend::from_rows(host_rows(&[("a", 1)])));
    // 表名不同，结构指纹也不同
    for query in ["SELECT host FROM a", "SELECT host FROM b"] {
        h.service.execute_query(&sql_job(query), None).await.unwrap();
    }
    let tagged = sql_job("SELECT host FROM c").with_metadata("cache_tags", "reports");
    h.service.execute_query(&tagged, None).await.unwrap();

    assert_eq!(h.service.clear_cache(Some(&["reports".to_string()])).await.unwrap(), 1);
    assert_eq!(h.service.clear_cache(None).await.unwrap(), 2);
    assert_eq!(h.service.clear_cache(None).await.unwrap(), 0);

    let rerun = h.service.execute_query(&sql_job("SELECT host FROM a"), None).await.unwrap();
    assert!(!rerun.flag("cache_hit"));
}

#[tokio::test]
async fn test_disabled_cache_always_executes() {
    let mut config = testing_config(4);
    config.cache.enabled = false;
    let h = TestHarness::new(&config, MemoryRelationalBackend::from_rows(host_rows(&[("a", 1)])));
    assert!(h.service.cache().is_none());

    let job = sql_job("SELECT host FROM events");
    h.service.execute_query(&job, None).await.unwrap();
    h.service.execute_query(&job, None).await.unwrap();
    assert_eq!(h.executed(), 2);
    assert_eq!(h.service.clear_cache(None).await.unwrap(), 0);
    assert!(h.service.get_stats().await.cache.is_none());
}

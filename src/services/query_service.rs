//! 查询执行服务
//!
//! 编排一次作业的完整流程：
//! 接收 → 查缓存 →（命中即完成）| 验证 → 优化 → 并行判定 → 并行执行 | 串行执行 → 写缓存 → 完成
//!
//! 缓存读写失败只记录日志，不会让作业失败；并行路径上的任何失败都退回到对原始作业的串行执行。

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::backend::{CacheStore, RelationalBackend, SearchBackend, SearchRequest};
use crate::cache::{cache_key, CacheFactory, FlightRole, ResultCache, SetOptions, SingleFlight, WarmUpQuery};
use crate::config::Config;
use crate::core::error::{CoreResult, QueryError};
use crate::core::types::{ParamMap, QueryJob, QueryLanguage, QueryResult};
use crate::query::optimizer::{DslTranslator, OptimizedQuery, OptimizerStats, QueryOptimizer};
use crate::query::planner::{CostHint, ParallelPlanner};
use crate::query::scheduler::ParallelRunner;
use crate::query::validator::{QueryValidator, ValidationReport};
use crate::query::{QueryExecutor, ResultMerger};
use crate::services::policy::ExecutionPolicy;
use crate::services::state::{JobState, JobTracker, ProgressCallback};
use crate::services::stats::{ServiceEvent, ServiceReport, ServiceStats};

/// 预热执行的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmUpSummary {
    pub already_cached: usize,
    pub executed: usize,
    pub failed: usize,
}

pub struct QueryExecutionService {
    validator: QueryValidator,
    optimizer: QueryOptimizer,
    planner: ParallelPlanner,
    runner: ParallelRunner,
    executor: QueryExecutor,
    merger: ResultMerger,
    policy: ExecutionPolicy,
    search: Option<Arc<dyn SearchBackend>>,
    cache: Option<Arc<dyn ResultCache>>,
    flights: SingleFlight<QueryResult>,
    stats: Arc<ServiceStats>,
}

impl QueryExecutionService {
    /// `cache_store` 为空或配置关闭缓存时不使用结果缓存
    pub fn new(
        config: &Config,
        relational: Arc<dyn RelationalBackend>,
        search: Option<Arc<dyn SearchBackend>>,
        cache_store: Option<Arc<dyn CacheStore>>,
    ) -> CoreResult<Self> {
        config.validate()?;

        let translator = DslTranslator::new(&config.optimizer);
        let cache = match cache_store {
            Some(store) if config.cache.enabled => Some(CacheFactory::create(&config.cache, store)),
            _ => None,
        };

        Ok(Self {
            validator: QueryValidator::new(Some(Arc::clone(&relational)), translator.clone()),
            optimizer: QueryOptimizer::new(
                &config.optimizer,
                Arc::clone(&relational),
                Arc::new(OptimizerStats::new()),
            )?,
            planner: ParallelPlanner::new(&config.execution, translator.clone(), search.clone()),
            runner: ParallelRunner::new(config.execution.max_concurrency),
            executor: QueryExecutor::new(relational, search.clone(), translator)
                .with_time_field(config.execution.time_field.clone()),
            merger: ResultMerger::new(),
            policy: ExecutionPolicy::new(&config.execution),
            search,
            cache,
            flights: SingleFlight::new(),
            stats: Arc::new(ServiceStats::new()),
        })
    }

    /// 替换结果缓存实现
    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<dyn ResultCache>> {
        self.cache.as_ref()
    }

    /// 执行作业
    ///
    /// 同一缓存键的并发请求只执行一次，其余请求共享该次执行的结果或错误
    pub async fn execute_query(
        &self,
        job: &QueryJob,
        progress: Option<&ProgressCallback>,
    ) -> CoreResult<QueryResult> {
        let started = Instant::now();
        let mut tracker = JobTracker::new(job.id.clone(), progress);
        self.stats.record(ServiceEvent::Job);

        let outcome = self.run(job, &mut tracker).await;
        match &outcome {
            Ok(result) => log::info!(
                "作业 {} 完成: {} 行, 耗时 {} ms, 缓存命中={}, 并行={}",
                job.id,
                result.total_rows,
                started.elapsed().as_millis(),
                result.flag("cache_hit"),
                result.flag("parallel_execution")
            ),
            Err(e) => {
                self.stats.record(ServiceEvent::Failure);
                tracker.fail(e);
                log::error!("作业 {} 失败: {}", job.id, e);
            }
        }
        outcome
    }

    async fn run(&self, job: &QueryJob, tracker: &mut JobTracker<'_>) -> CoreResult<QueryResult> {
        tracker.advance(JobState::CacheCheck, "检查缓存")?;
        let use_cache = self.cache.is_some() && self.policy.should_cache(job, Utc::now());
        if use_cache {
            if let Some(mut result) = self.cached_result(job).await {
                result.job_id = job.id.clone();
                result.set_flag("cache_hit", true);
                tracker.advance(JobState::Done, "缓存命中")?;
                return Ok(result);
            }
        }

        let key = cache_key(job.language, &job.query, &job.params);
        let (outcome, role) = self
            .flights
            .run(&key, || self.execute_uncached(job, use_cache, &mut *tracker))
            .await;

        match role {
            FlightRole::Leader => outcome,
            FlightRole::Follower => {
                self.stats.record(ServiceEvent::SingleFlightJoin);
                let mut result = outcome?;
                result.job_id = job.id.clone();
                result.set_flag("shared_execution", true);
                tracker.advance(JobState::Done, "复用并发执行的结果")?;
                Ok(result)
            }
        }
    }

    async fn cached_result(&self, job: &QueryJob) -> Option<QueryResult> {
        let cache = self.cache.as_ref()?;
        match cache.get(job.language, &job.query, &job.params).await {
            Ok(Some(hit)) => {
                self.stats.record(ServiceEvent::CacheHit);
                log::debug!("作业 {} 命中缓存 ({:?})", job.id, hit.source);
                Some(hit.result)
            }
            Ok(None) => {
                self.stats.record(ServiceEvent::CacheMiss);
                None
            }
            Err(e) => {
                self.stats.record(ServiceEvent::CacheError);
                log::warn!("读取缓存失败，按未命中处理: {}", e);
                None
            }
        }
    }

    async fn execute_uncached(
        &self,
        job: &QueryJob,
        use_cache: bool,
        tracker: &mut JobTracker<'_>,
    ) -> CoreResult<QueryResult> {
        tracker.advance(JobState::Validating, "验证查询")?;
        self.validator
            .validate(job.language, &job.query)
            .await
            .into_result()?;

        tracker.advance(JobState::Optimizing, "优化查询")?;
        let plan = self.optimizer.optimize(&job.query, job.language).await;
        let exec_job = executable_job(job, &plan);

        tracker.advance(JobState::ParallelDecision, "判定是否并行")?;
        let estimated_ms = self.estimated_ms(&exec_job, &plan).await;
        let sql = (exec_job.language != QueryLanguage::SearchIndex).then_some(exec_job.query.as_str());
        let parallel = self.policy.should_parallelize(&exec_job, estimated_ms, sql);
        log::debug!(
            "作业 {} 预估耗时 {} ms, 并行={}",
            job.id,
            estimated_ms,
            parallel
        );

        let mut result = if parallel {
            tracker.advance(JobState::ParallelExecute, "并行执行")?;
            let hint = CostHint {
                cost: plan.estimated_cost,
                rows: plan.estimated_rows,
            };
            match self.execute_parallel(&exec_job, hint).await {
                Ok(result) => {
                    self.stats.record(ServiceEvent::ParallelRun);
                    result
                }
                Err(e) => {
                    self.stats.record(ServiceEvent::ParallelFallback);
                    log::warn!("作业 {} 并行执行失败，退回串行执行: {}", job.id, e);
                    tracker.advance(JobState::SequentialExecute, "退回串行执行")?;
                    self.execute_sequential(job).await?
                }
            }
        } else {
            tracker.advance(JobState::SequentialExecute, "串行执行")?;
            self.execute_sequential(&exec_job).await?
        };

        result.job_id = job.id.clone();
        result.set_flag("cache_hit", false);
        result.set_flag("query_optimized", !plan.applied_optimizations.is_empty());
        if !plan.applied_optimizations.is_empty() {
            result.set_metadata("optimizations", plan.applied_optimizations.clone());
        }
        if !result.metadata.contains_key("parallel_execution") {
            result.set_flag("parallel_execution", false);
        }

        tracker.advance(JobState::CachePopulate, "写入缓存")?;
        if use_cache {
            self.populate_cache(job, &result).await;
        }
        tracker.advance(JobState::Done, "完成")?;
        Ok(result)
    }

    /// 规划、运行并合并；计划不值得并行时也返回错误，由调用方退回串行
    async fn execute_parallel(&self, job: &QueryJob, hint: CostHint) -> CoreResult<QueryResult> {
        let plan = self.planner.plan_with_cost(job, hint).await?;
        if !plan.is_worth_running() {
            return Err(QueryError::ParallelPlanning(format!(
                "作业 {} 无法拆分为多个子查询",
                job.id
            )));
        }

        let results = self.runner.run(&plan.subqueries, &self.executor).await?;
        let mut merged = self.merger.merge(results, &plan.merge_strategy, job)?;
        merged.set_flag("parallel_execution", true);
        merged.set_metadata("merge_strategy", plan.merge_strategy.name());
        merged.set_metadata("subquery_count", plan.subqueries.len());
        Ok(merged)
    }

    async fn execute_sequential(&self, job: &QueryJob) -> CoreResult<QueryResult> {
        self.stats.record(ServiceEvent::SequentialRun);
        self.executor.execute(job).await
    }

    async fn populate_cache(&self, job: &QueryJob, result: &QueryResult) {
        let Some(cache) = &self.cache else {
            return;
        };
        let now = Utc::now();
        let options = SetOptions::new()
            .with_ttl(self.policy.cache_ttl(job, now))
            .with_tags(self.policy.cache_tags(job));
        if let Err(e) = cache
            .set(
                job.language,
                &job.query,
                result,
                options,
                &job.params,
                result.execution_time_ms,
            )
            .await
        {
            self.stats.record(ServiceEvent::CacheError);
            log::warn!("作业 {} 写入缓存失败: {}", job.id, e);
        }
    }

    /// 并行判定使用的预估耗时
    async fn estimated_ms(&self, job: &QueryJob, plan: &OptimizedQuery) -> u64 {
        match job.language {
            QueryLanguage::SearchIndex => self.search_estimate(&job.query).await,
            QueryLanguage::Sql | QueryLanguage::Dsl => self.policy.duration_from_cost(plan.estimated_cost),
        }
    }

    async fn search_estimate(&self, query: &str) -> u64 {
        let outcome = async {
            let request = SearchRequest::parse(query)?;
            let search = self
                .search
                .as_ref()
                .ok_or_else(|| QueryError::Backend("未配置检索后端".to_string()))?;
            search.resolve_indices(&request.index).await
        }
        .await;
        match outcome {
            Ok(indices) => self.policy.duration_from_indices(indices.len()),
            Err(e) => {
                log::warn!("检索耗时估算失败: {}", e);
                0
            }
        }
    }

    /// 预估作业耗时（毫秒），估算失败时为 0
    pub async fn estimate_duration(&self, language: QueryLanguage, query: &str, params: &ParamMap) -> u64 {
        log::debug!("估算 {} 查询耗时, 参数 {} 个", language, params.len());
        let sql = match language {
            QueryLanguage::SearchIndex => return self.search_estimate(query).await,
            QueryLanguage::Sql => query.to_string(),
            QueryLanguage::Dsl => match self.optimizer.translate_dsl(query) {
                Ok(sql) => sql,
                Err(e) => {
                    log::warn!("领域查询转换失败，无法估算耗时: {}", e);
                    return 0;
                }
            },
        };
        match self.optimizer.estimate(&sql).await {
            Ok(estimate) => self.policy.duration_from_cost(estimate.cost),
            Err(e) => {
                log::warn!("执行计划估算失败: {}", e);
                0
            }
        }
    }

    pub async fn validate_query(&self, language: QueryLanguage, query: &str) -> ValidationReport {
        self.validator.validate(language, query).await
    }

    pub async fn get_stats(&self) -> ServiceReport {
        let cache = match &self.cache {
            Some(cache) => match cache.stats().await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    log::warn!("读取缓存统计失败: {}", e);
                    None
                }
            },
            None => None,
        };
        ServiceReport {
            service: self.stats.snapshot(),
            optimizer: self.optimizer.stats(),
            plan_cache: self.optimizer.plan_cache_stats(),
            cache,
        }
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// 检查代表性查询的缓存状态，并执行尚未缓存的查询
    pub async fn warm_up_cache(&self, queries: &[WarmUpQuery]) -> CoreResult<WarmUpSummary> {
        let Some(cache) = &self.cache else {
            return Ok(WarmUpSummary::default());
        };
        let report = cache.warm_up(queries).await?;

        let mut summary = WarmUpSummary {
            already_cached: report.warm.len(),
            ..WarmUpSummary::default()
        };
        for query in &report.cold {
            let job = QueryJob::new(query.query.clone(), query.language).with_params(query.params.clone());
            match self.execute_query(&job, None).await {
                Ok(_) => summary.executed += 1,
                Err(e) => {
                    summary.failed += 1;
                    log::warn!("预热查询执行失败: {}", e);
                }
            }
        }
        log::info!(
            "缓存预热完成: 已缓存 {}, 新执行 {}, 失败 {}",
            summary.already_cached,
            summary.executed,
            summary.failed
        );
        Ok(summary)
    }

    /// 给定非空标签时按标签失效，否则清空全部缓存与优化计划缓存
    pub async fn clear_cache(&self, tags: Option<&[String]>) -> CoreResult<usize> {
        let Some(cache) = &self.cache else {
            return Ok(0);
        };
        match tags {
            Some(tags) if !tags.is_empty() => cache.invalidate_by_tags(tags).await,
            _ => {
                self.optimizer.clear_cache();
                cache.clear().await
            }
        }
    }
}

/// 优化后实际执行的作业：改写过的 SQL 替换原文，转换成功的领域查询改按 SQL 执行
///
/// 计划缓存按规范化文本命中，计划可能来自大小写或空白不同的另一条查询，
/// 此时只能执行作业自己的文本。
fn executable_job(job: &QueryJob, plan: &OptimizedQuery) -> QueryJob {
    if !plan.is_rewritten() || plan.original_query != job.query {
        return job.clone();
    }
    match job.language {
        QueryLanguage::Sql => job.with_query(plan.optimized_query.clone()),
        QueryLanguage::Dsl => job.translated(plan.optimized_query.clone(), QueryLanguage::Sql),
        QueryLanguage::SearchIndex => job.clone(),
    }
}

impl std::fmt::Debug for QueryExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutionService")
            .field("policy", &self.policy)
            .field("cache", &self.cache)
            .field("flights", &self.flights)
            .finish()
    }
}

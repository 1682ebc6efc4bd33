//! 并行化规划器
//!
//! 按查询语言分派：
//! - SQL：含连接时保守地不并行；带可用时间范围时按时间分区
//! - 检索：索引模式解析出多个具体索引且数量不超过并发上限时，每个索引一个子查询
//! - 领域查询语言：先转换为 SQL，再按时间分区

pub mod plan;
pub mod time_partition;

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::backend::{SearchBackend, SearchRequest};
use crate::config::ExecutionConfig;
use crate::core::error::{CoreResult, QueryError};
use crate::core::types::{QueryJob, QueryLanguage, TimeRange};
use crate::query::optimizer::DslTranslator;

pub use plan::{
    DataPartition, MergeStrategy, ParallelQueryPlan, ParallelSubquery, PartitionKind,
    PartitionSegment, SubqueryTarget,
};
pub use time_partition::{inject_condition, range_condition, split_time_range, MIN_PARTITION_HOURS};

fn join_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bJOIN\b").expect("static regex"))
}

fn aggregation_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bGROUP\s+BY\b|\b(?:COUNT|SUM|AVG|MIN|MAX)\s*\(").expect("static regex")
    })
}

pub fn has_join(sql: &str) -> bool {
    join_pattern().is_match(sql)
}

pub fn has_aggregation(sql: &str) -> bool {
    aggregation_pattern().is_match(sql)
}

/// 规划所用的代价估算，分摊到每个分段
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostHint {
    pub cost: f64,
    pub rows: f64,
}

pub struct ParallelPlanner {
    search: Option<Arc<dyn SearchBackend>>,
    translator: DslTranslator,
    max_concurrency: usize,
    time_field: String,
}

impl ParallelPlanner {
    pub fn new(
        config: &ExecutionConfig,
        translator: DslTranslator,
        search: Option<Arc<dyn SearchBackend>>,
    ) -> Self {
        Self {
            search,
            translator,
            max_concurrency: config.max_concurrency.max(1),
            time_field: config.time_field.clone(),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub async fn plan(&self, job: &QueryJob) -> CoreResult<ParallelQueryPlan> {
        self.plan_with_cost(job, CostHint::default()).await
    }

    pub async fn plan_with_cost(&self, job: &QueryJob, hint: CostHint) -> CoreResult<ParallelQueryPlan> {
        let plan = match job.language {
            QueryLanguage::Sql => self.plan_sql(job, &job.query, hint),
            QueryLanguage::SearchIndex => self.plan_search(job).await?,
            QueryLanguage::Dsl => {
                let sql = self.translator.translate(&job.query).map_err(|e| {
                    QueryError::ParallelPlanning(format!("领域查询转换失败: {}", e))
                })?;
                match usable_range(job) {
                    Some(range) => self.partition_by_time(job, &sql, range, hint)?,
                    None => ParallelQueryPlan::not_parallelizable(),
                }
            }
        };
        plan.validate_dependencies()?;

        log::debug!(
            "作业 {} 并行规划: 可并行={}, 子查询={}, 预计加速={:.2}",
            job.id,
            plan.can_parallelize,
            plan.subqueries.len(),
            plan.estimated_speedup
        );
        Ok(plan)
    }

    fn plan_sql(&self, job: &QueryJob, sql: &str, hint: CostHint) -> ParallelQueryPlan {
        if has_join(sql) {
            // 连接拆分需要真正的代价模型
            return ParallelQueryPlan::not_parallelizable();
        }
        // 聚合查询与普通查询都只在有可用时间范围时才按时间分区
        match usable_range(job) {
            Some(range) => self
                .partition_by_time(job, sql, range, hint)
                .unwrap_or_else(|e| {
                    log::warn!("作业 {} 时间分区失败: {}", job.id, e);
                    ParallelQueryPlan::not_parallelizable()
                }),
            None => ParallelQueryPlan::not_parallelizable(),
        }
    }

    async fn plan_search(&self, job: &QueryJob) -> CoreResult<ParallelQueryPlan> {
        let request = SearchRequest::parse(&job.query)
            .map_err(|e| QueryError::ParallelPlanning(e.to_string()))?;
        let search = self
            .search
            .as_ref()
            .ok_or_else(|| QueryError::ParallelPlanning("未配置检索后端".to_string()))?;
        let indices = search
            .resolve_indices(&request.index)
            .await
            .map_err(|e| QueryError::ParallelPlanning(format!("索引模式解析失败: {}", e)))?;

        if indices.len() <= 1 || indices.len() > self.max_concurrency {
            return Ok(ParallelQueryPlan::not_parallelizable());
        }

        let subqueries = indices
            .iter()
            .enumerate()
            .map(|(i, index)| {
                let mut sq = ParallelSubquery::new(
                    format!("{}-idx-{}", job.id, i),
                    request.narrowed_to(index).to_query(),
                    SubqueryTarget::SearchIndex {
                        index: index.clone(),
                    },
                )
                .with_params(job.params.clone())
                .with_priority(job.priority)
                .with_partition(DataPartition {
                    kind: PartitionKind::Index,
                    field: request.index.clone(),
                    segments: vec![PartitionSegment {
                        id: index.clone(),
                        condition: format!("index = {}", index),
                        estimated_rows: 0.0,
                        estimated_cost: 0.0,
                    }],
                });
                if let Some(range) = job.time_range {
                    sq = sq.with_time_range(range);
                }
                sq
            })
            .collect::<Vec<_>>();

        let speedup = (indices.len() as f64 * 0.9).min(self.max_concurrency as f64 * 0.8);
        Ok(ParallelQueryPlan::parallel(subqueries, MergeStrategy::Union, speedup))
    }

    fn partition_by_time(
        &self,
        job: &QueryJob,
        sql: &str,
        range: TimeRange,
        hint: CostHint,
    ) -> CoreResult<ParallelQueryPlan> {
        let segments = split_time_range(&range, self.max_concurrency)?;
        let count = segments.len() as f64;

        let subqueries = segments
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                let condition = range_condition(&self.time_field, segment);
                ParallelSubquery::new(
                    format!("{}-seg-{}", job.id, i),
                    inject_condition(sql, &condition),
                    SubqueryTarget::Relational,
                )
                .with_params(job.params.clone())
                .with_time_range(*segment)
                .with_priority(job.priority)
                .with_partition(DataPartition {
                    kind: PartitionKind::Time,
                    field: self.time_field.clone(),
                    segments: vec![PartitionSegment {
                        id: format!("segment-{}", i),
                        condition,
                        estimated_rows: hint.rows / count,
                        estimated_cost: hint.cost / count,
                    }],
                })
            })
            .collect::<Vec<_>>();

        let speedup = (count * 0.8).min(self.max_concurrency as f64 * 0.7);
        Ok(ParallelQueryPlan::parallel(subqueries, MergeStrategy::Union, speedup))
    }
}

fn usable_range(job: &QueryJob) -> Option<TimeRange> {
    job.time_range.filter(time_partition::is_partitionable)
}

impl std::fmt::Debug for ParallelPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelPlanner")
            .field("max_concurrency", &self.max_concurrency)
            .field("time_field", &self.time_field)
            .field("search", &self.search.is_some())
            .finish()
    }
}

//! 查询优化器
//!
//! 对查询文本依次应用改写规则，通过后端执行计划估算代价与行数，
//! 分析计划树产生警告，并给出缺失索引建议。
//!
//! 优化过程中的任何错误都不会向外传播：失败时返回原始查询、零代价和一条说明警告，
//! 且失败结果不进入计划缓存。

pub mod analysis;
pub mod dsl;
pub mod index_advisor;
pub mod plan_cache;
pub mod rules;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::backend::{PooledConnection, RelationalBackend};
use crate::config::OptimizerConfig;
use crate::core::error::CoreResult;
use crate::core::types::QueryLanguage;

pub use analysis::{analyze_plan, PlanEstimate, PlanThresholds};
pub use dsl::DslTranslator;
pub use index_advisor::IndexAdvisor;
pub use plan_cache::{normalize_query, PlanCache, PlanCacheKey, PlanCacheStats};
pub use rules::{apply_rules, default_rules, RewriteOutcome, RewriteRule};

/// 优化结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedQuery {
    pub original_query: String,
    pub optimized_query: String,
    pub estimated_cost: f64,
    pub estimated_rows: f64,
    /// 实际生效的改写规则描述
    pub applied_optimizations: Vec<String>,
    pub index_suggestions: Vec<String>,
    pub warnings: Vec<String>,
}

impl OptimizedQuery {
    /// 原样返回、零代价的结果
    pub fn unchanged(query: &str) -> Self {
        Self {
            original_query: query.to_string(),
            optimized_query: query.to_string(),
            estimated_cost: 0.0,
            estimated_rows: 0.0,
            applied_optimizations: Vec::new(),
            index_suggestions: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// 优化失败时的退化结果
    pub fn fallback(query: &str, reason: &str) -> Self {
        let mut plan = Self::unchanged(query);
        plan.warnings.push(format!("查询优化失败，使用原始查询: {}", reason));
        plan
    }

    /// 执行时实际使用的文本是否与提交的文本不同
    pub fn is_rewritten(&self) -> bool {
        self.optimized_query != self.original_query
    }
}

/// 优化器统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptimizerStatsSnapshot {
    pub optimizations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rewrites_applied: u64,
    pub failures: u64,
}

impl OptimizerStatsSnapshot {
    pub fn merge(&mut self, other: &OptimizerStatsSnapshot) {
        self.optimizations += other.optimizations;
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
        self.rewrites_applied += other.rewrites_applied;
        self.failures += other.failures;
    }
}

/// 优化器统计收集器，由调用方持有并共享
#[derive(Debug, Default)]
pub struct OptimizerStats {
    inner: RwLock<OptimizerStatsSnapshot>,
}

impl OptimizerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> OptimizerStatsSnapshot {
        self.inner.read().clone()
    }

    pub fn reset(&self) {
        *self.inner.write() = OptimizerStatsSnapshot::default();
    }

    fn record(&self, update: impl FnOnce(&mut OptimizerStatsSnapshot)) {
        update(&mut self.inner.write());
    }
}

pub struct QueryOptimizer {
    backend: Arc<dyn RelationalBackend>,
    rules: Vec<RewriteRule>,
    advisor: IndexAdvisor,
    translator: DslTranslator,
    thresholds: PlanThresholds,
    cache: PlanCache,
    stats: Arc<OptimizerStats>,
}

impl QueryOptimizer {
    pub fn new(
        config: &OptimizerConfig,
        backend: Arc<dyn RelationalBackend>,
        stats: Arc<OptimizerStats>,
    ) -> CoreResult<Self> {
        Ok(Self {
            backend,
            rules: default_rules()?,
            advisor: IndexAdvisor::new()?,
            translator: DslTranslator::new(config),
            thresholds: PlanThresholds {
                seq_scan_rows: config.seq_scan_row_threshold,
                nested_loop_rows: config.nested_loop_row_threshold,
            },
            cache: PlanCache::new(config.plan_cache_size)?,
            stats,
        })
    }

    pub async fn optimize(&self, query: &str, language: QueryLanguage) -> OptimizedQuery {
        let key = PlanCacheKey::new(language, query);
        if let Some(plan) = self.cache.get(&key) {
            self.stats.record(|s| s.cache_hits += 1);
            return plan;
        }
        self.stats.record(|s| s.cache_misses += 1);

        let outcome = match language {
            QueryLanguage::Sql => self.optimize_sql(query, query).await,
            QueryLanguage::Dsl => match self.translator.translate(query) {
                Ok(sql) => self.optimize_sql(query, &sql).await,
                Err(e) => Err(e),
            },
            // 检索查询不经过关系型执行计划
            QueryLanguage::SearchIndex => Ok(OptimizedQuery::unchanged(query)),
        };

        match outcome {
            Ok(plan) => {
                self.stats.record(|s| {
                    s.optimizations += 1;
                    s.rewrites_applied += plan.applied_optimizations.len() as u64;
                });
                self.cache.put(key, plan.clone());
                plan
            }
            Err(e) => {
                log::warn!("查询优化失败，退回原始查询: {}", e);
                self.stats.record(|s| s.failures += 1);
                OptimizedQuery::fallback(query, &e.to_string())
            }
        }
    }

    /// 把领域查询语言转换为 SQL
    pub fn translate_dsl(&self, dsl: &str) -> CoreResult<String> {
        self.translator.translate(dsl)
    }

    /// 通过后端执行计划估算代价，不做改写
    pub async fn estimate(&self, sql: &str) -> CoreResult<PlanEstimate> {
        let mut conn = PooledConnection::acquire(self.backend.as_ref()).await?;
        let plan = conn.explain(sql).await?;
        Ok(analyze_plan(&plan, self.thresholds))
    }

    pub fn stats(&self) -> OptimizerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn plan_cache_stats(&self) -> PlanCacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    async fn optimize_sql(&self, original: &str, sql: &str) -> CoreResult<OptimizedQuery> {
        let rewritten = apply_rules(&self.rules, sql)?;
        let estimate = self.estimate(&rewritten.query).await?;
        let index_suggestions = self.advisor.suggest(&rewritten.query);

        log::debug!(
            "查询优化完成: 改写 {} 处, 代价 {:.2}, 估计 {:.0} 行",
            rewritten.applied.len(),
            estimate.cost,
            estimate.rows
        );

        Ok(OptimizedQuery {
            original_query: original.to_string(),
            optimized_query: rewritten.query,
            estimated_cost: estimate.cost,
            estimated_rows: estimate.rows,
            applied_optimizations: rewritten.applied,
            index_suggestions,
            warnings: estimate.warnings,
        })
    }
}

impl std::fmt::Debug for QueryOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptimizer")
            .field("rules", &self.rules.len())
            .field("thresholds", &self.thresholds)
            .field("cache", &self.cache)
            .finish()
    }
}

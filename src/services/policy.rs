//! 执行与缓存策略
//!
//! 并行判定：启用并行，预估耗时达到下限，且作业具备可拆分的特征
//! （时间范围至少两小时、通配索引模式、或带计数 / 求和的分组聚合）。

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::backend::SearchRequest;
use crate::config::ExecutionConfig;
use crate::core::types::{QueryJob, QueryLanguage};
use crate::query::planner::MIN_PARTITION_HOURS;

const HOUR: Duration = Duration::from_secs(3600);

fn group_by() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bGROUP\s+BY\b").expect("static regex"))
}

fn count_or_sum() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:COUNT|SUM)\s*\(").expect("static regex"))
}

/// 分组且带计数或求和的聚合
pub fn is_splittable_aggregation(sql: &str) -> bool {
    group_by().is_match(sql) && count_or_sum().is_match(sql)
}

#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    enable_parallel: bool,
    min_parallel_duration_ms: u64,
    cost_ms_per_unit: f64,
    search_ms_per_index: u64,
    recent_window: chrono::Duration,
}

impl ExecutionPolicy {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            enable_parallel: config.enable_parallel,
            min_parallel_duration_ms: config.min_parallel_duration_ms,
            cost_ms_per_unit: config.cost_ms_per_unit,
            search_ms_per_index: config.search_ms_per_index,
            recent_window: chrono::Duration::seconds(config.recent_data_window_secs as i64),
        }
    }

    /// 把执行计划代价换算为毫秒
    pub fn duration_from_cost(&self, cost: f64) -> u64 {
        (cost.max(0.0) * self.cost_ms_per_unit).round() as u64
    }

    pub fn duration_from_indices(&self, index_count: usize) -> u64 {
        self.search_ms_per_index * index_count as u64
    }

    /// 作业是否具备可拆分的特征；`sql` 为实际执行的关系型文本
    pub fn has_split_shape(&self, job: &QueryJob, sql: Option<&str>) -> bool {
        if job
            .time_range
            .map_or(false, |range| range.hours() >= MIN_PARTITION_HOURS)
        {
            return true;
        }
        match job.language {
            QueryLanguage::SearchIndex => SearchRequest::parse(&job.query)
                .map(|request| request.is_wildcard())
                .unwrap_or(false),
            QueryLanguage::Sql | QueryLanguage::Dsl => sql.map_or(false, is_splittable_aggregation),
        }
    }

    pub fn should_parallelize(&self, job: &QueryJob, estimated_ms: u64, sql: Option<&str>) -> bool {
        self.enable_parallel
            && estimated_ms >= self.min_parallel_duration_ms
            && self.has_split_shape(job, sql)
    }

    /// 实时作业、用户私有作业、以及时间范围触及最近数据的作业不走缓存
    pub fn should_cache(&self, job: &QueryJob, now: DateTime<Utc>) -> bool {
        if job.is_realtime() || job.is_user_scoped() {
            return false;
        }
        match job.time_range {
            Some(range) => range.end < now - self.recent_window,
            None => true,
        }
    }

    /// 数据越旧 TTL 越长：超过一天 24 小时，一小时到一天 4 小时，其余 1 小时
    pub fn cache_ttl(&self, job: &QueryJob, now: DateTime<Utc>) -> Duration {
        let Some(range) = job.time_range else {
            return HOUR;
        };
        let age = now - range.end;
        if age > chrono::Duration::hours(24) {
            24 * HOUR
        } else if age >= chrono::Duration::hours(1) {
            4 * HOUR
        } else {
            HOUR
        }
    }

    pub fn cache_tags(&self, job: &QueryJob) -> Vec<String> {
        let mut tags = vec![format!("lang:{}", job.language.tag())];
        for tag in job.cache_tags() {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags
    }
}

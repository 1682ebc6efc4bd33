//! 查询执行
//!
//! 串行执行整个作业，或作为 `SubqueryExecutor` 执行并行计划中的单个子查询。
//! 每次关系型执行只获取一个池化连接，并由连接守卫在所有退出路径上归还。

pub mod merger;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::{
    FieldDescriptor, PooledConnection, RelationalBackend, SearchBackend, SearchRequest,
};
use crate::core::error::{CoreResult, QueryError};
use crate::core::types::{ColumnInfo, ColumnType, ParamMap, QueryJob, QueryLanguage, QueryResult};
use crate::query::optimizer::DslTranslator;
use crate::query::planner::{inject_condition, range_condition, ParallelSubquery, SubqueryTarget};
use crate::query::scheduler::SubqueryExecutor;

pub use merger::ResultMerger;

pub struct QueryExecutor {
    relational: Arc<dyn RelationalBackend>,
    search: Option<Arc<dyn SearchBackend>>,
    translator: DslTranslator,
    time_field: String,
}

impl QueryExecutor {
    pub fn new(
        relational: Arc<dyn RelationalBackend>,
        search: Option<Arc<dyn SearchBackend>>,
        translator: DslTranslator,
    ) -> Self {
        Self {
            relational,
            search,
            translator,
            time_field: "timestamp".to_string(),
        }
    }

    /// 作业时间范围作用的列名
    pub fn with_time_field(mut self, field: impl Into<String>) -> Self {
        self.time_field = field.into();
        self
    }

    /// 串行执行整个作业
    ///
    /// 作业带时间范围时注入整段范围谓词，与并行分段的并集覆盖相同的数据。
    pub async fn execute(&self, job: &QueryJob) -> CoreResult<QueryResult> {
        let mut result = match job.language {
            QueryLanguage::Sql => {
                let sql = self.bounded(job, &job.query);
                self.execute_sql(&job.id, &sql, &job.params).await?
            }
            QueryLanguage::Dsl => {
                let sql = self.translator.translate(&job.query)?;
                let sql = self.bounded(job, &sql);
                self.execute_sql(&job.id, &sql, &job.params).await?
            }
            QueryLanguage::SearchIndex => {
                let request = SearchRequest::parse(&job.query)?;
                self.execute_search(&job.id, &request).await?
            }
        };
        result.job_id = job.id.clone();
        Ok(result)
    }

    fn bounded(&self, job: &QueryJob, sql: &str) -> String {
        match &job.time_range {
            Some(range) => inject_condition(sql, &range_condition(&self.time_field, range)),
            None => sql.to_string(),
        }
    }

    async fn execute_sql(&self, result_id: &str, sql: &str, params: &ParamMap) -> CoreResult<QueryResult> {
        let started = Instant::now();
        let bound = positional_params(params);

        let rows = {
            let mut conn = PooledConnection::acquire(self.relational.as_ref()).await?;
            conn.query(sql, &bound).await?
        };

        let columns = if rows.rows.is_empty() {
            columns_from_fields(&rows.fields)
        } else {
            ColumnInfo::infer_from_rows(&rows.rows)
        };
        let row_count = rows.row_count;
        let mut result = QueryResult::new(
            result_id,
            rows.rows,
            columns,
            started.elapsed().as_millis() as u64,
        );
        if let Some(reported) = row_count {
            result = result.with_reported_total(reported);
        }
        Ok(result)
    }

    async fn execute_search(&self, result_id: &str, request: &SearchRequest) -> CoreResult<QueryResult> {
        let search = self
            .search
            .as_ref()
            .ok_or_else(|| QueryError::Backend("未配置检索后端".to_string()))?;

        let started = Instant::now();
        let response = search.search(&request.index, &request.body).await?;
        let columns = ColumnInfo::infer_from_rows(&response.hits);
        let mut result = QueryResult::new(
            result_id,
            response.hits,
            columns,
            started.elapsed().as_millis() as u64,
        );
        result.set_metadata("took_ms", response.took_ms);
        if let Some(total) = response.total {
            result = result.with_reported_total(total);
        }
        Ok(result)
    }
}

#[async_trait]
impl SubqueryExecutor for QueryExecutor {
    async fn execute_subquery(&self, subquery: &ParallelSubquery) -> CoreResult<QueryResult> {
        match &subquery.target {
            SubqueryTarget::Relational => {
                self.execute_sql(&subquery.id, &subquery.query, &subquery.params)
                    .await
            }
            SubqueryTarget::SearchIndex { index } => {
                let request = SearchRequest::parse(&subquery.query)?.narrowed_to(index);
                self.execute_search(&subquery.id, &request).await
            }
        }
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("search", &self.search.is_some())
            .finish()
    }
}

/// 参数按位置绑定
///
/// 键全部是数字（可带 `$` 前缀）时按数值排序，否则按键的字典序
pub fn positional_params(params: &ParamMap) -> Vec<Value> {
    let numbered: Option<Vec<(u64, &Value)>> = params
        .iter()
        .map(|(k, v)| k.trim_start_matches('$').parse::<u64>().ok().map(|n| (n, v)))
        .collect();

    match numbered {
        Some(mut numbered) => {
            numbered.sort_by_key(|(n, _)| *n);
            numbered.into_iter().map(|(_, v)| v.clone()).collect()
        }
        None => {
            let mut keyed: Vec<(&String, &Value)> = params.iter().collect();
            keyed.sort_by(|a, b| a.0.cmp(b.0));
            keyed.into_iter().map(|(_, v)| v.clone()).collect()
        }
    }
}

/// 结果为空时根据后端字段类型名推断列类型
pub fn columns_from_fields(fields: &[FieldDescriptor]) -> Vec<ColumnInfo> {
    fields
        .iter()
        .map(|f| ColumnInfo::new(f.name.clone(), column_type_for(&f.type_name)))
        .collect()
}

fn column_type_for(type_name: &str) -> ColumnType {
    match type_name.to_ascii_lowercase().as_str() {
        "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "serial" | "bigserial" => {
            ColumnType::Integer
        }
        "float4" | "float8" | "real" | "double precision" | "numeric" | "decimal" => ColumnType::Float,
        "bool" | "boolean" => ColumnType::Boolean,
        "text" | "varchar" | "char" | "bpchar" | "name" | "uuid" | "inet" => ColumnType::Text,
        "timestamp" | "timestamptz" | "date" | "time" => ColumnType::Timestamp,
        "json" | "jsonb" => ColumnType::Json,
        _ => ColumnType::Unknown,
    }
}

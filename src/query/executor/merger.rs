//! 结果合并
//!
//! - `Union`：按输入顺序拼接，行数相加，列描述取第一个结果，耗时取最大值
//! - `Intersection`：按键列求集合交集，保留第一个结果中首次出现的行
//! - `Custom`：尚未支持，返回 `UnsupportedMergeStrategy`

use std::collections::HashSet;

use serde_json::Value;

use crate::core::error::{CoreResult, QueryError};
use crate::core::types::{QueryJob, QueryResult, Row};
use crate::query::planner::MergeStrategy;

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultMerger;

impl ResultMerger {
    pub fn new() -> Self {
        Self
    }

    pub fn merge(
        &self,
        mut results: Vec<QueryResult>,
        strategy: &MergeStrategy,
        job: &QueryJob,
    ) -> CoreResult<QueryResult> {
        if results.is_empty() {
            return Err(QueryError::Merge("没有可合并的结果".to_string()));
        }
        if results.len() == 1 {
            return Ok(results.remove(0));
        }

        let parts = results.len();
        let execution_time_ms = results.iter().map(|r| r.execution_time_ms).max().unwrap_or(0);

        let mut merged = match strategy {
            MergeStrategy::Union => union(results, job),
            MergeStrategy::Intersection { key_columns } => intersection(results, key_columns, job)?,
            MergeStrategy::Custom { name } => {
                return Err(QueryError::UnsupportedMergeStrategy(name.clone()))
            }
        };
        merged.execution_time_ms = execution_time_ms;
        merged.set_metadata("merged_from", parts);
        merged.set_metadata("merge_strategy", strategy.name());
        Ok(merged)
    }
}

fn union(results: Vec<QueryResult>, job: &QueryJob) -> QueryResult {
    let total_rows = results.iter().map(|r| r.total_rows).sum();
    let mut iter = results.into_iter();
    // 调用方保证至少有两个结果
    let mut merged = match iter.next() {
        Some(first) => first,
        None => return QueryResult::empty(job.id.clone()),
    };
    for result in iter {
        merged.data.extend(result.data);
    }
    merged.job_id = job.id.clone();
    merged.total_rows = total_rows;
    merged.metadata.clear();
    merged
}

fn intersection(results: Vec<QueryResult>, key_columns: &[String], job: &QueryJob) -> CoreResult<QueryResult> {
    let mut iter = results.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| QueryError::Merge("没有可合并的结果".to_string()))?;

    let others: Vec<HashSet<String>> = iter
        .map(|r| {
            r.data
                .iter()
                .map(|row| row_key(row, key_columns))
                .collect::<CoreResult<HashSet<String>>>()
        })
        .collect::<CoreResult<_>>()?;

    let mut seen = HashSet::new();
    let mut data = Vec::new();
    for row in first.data {
        let key = row_key(&row, key_columns)?;
        if others.iter().all(|set| set.contains(&key)) && seen.insert(key) {
            data.push(row);
        }
    }
    Ok(QueryResult::new(job.id.clone(), data, first.columns, 0))
}

/// 键列取值的规范化表示；未指定键列时比较整行
fn row_key(row: &Row, key_columns: &[String]) -> CoreResult<String> {
    let key: Vec<&Value> = if key_columns.is_empty() {
        row.values().collect()
    } else {
        key_columns
            .iter()
            .map(|c| row.get(c).unwrap_or(&Value::Null))
            .collect()
    };
    Ok(serde_json::to_string(&key)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ColumnInfo, ColumnType, QueryLanguage};
    use serde_json::json;

    fn result(id: &str, rows: Vec<Value>, ms: u64) -> QueryResult {
        let rows: Vec<Row> = rows.into_iter().map(|v| v.as_object().cloned().unwrap()).collect();
        let columns = ColumnInfo::infer_from_rows(&rows);
        QueryResult::new(id, rows, columns, ms)
    }

    fn job() -> QueryJob {
        QueryJob::new("SELECT * FROM events", QueryLanguage::Sql).with_id("job-1")
    }

    #[test]
    fn test_zero_results_is_error() {
        let err = ResultMerger::new().merge(Vec::new(), &MergeStrategy::Union, &job()).unwrap_err();
        assert!(matches!(err, QueryError::Merge(_)));
    }

    #[test]
    fn test_single_result_unchanged() {
        let only = result("seg-0", vec![json!({"a": 1})], 12);
        let merged = ResultMerger::new()
            .merge(vec![only.clone()], &MergeStrategy::Union, &job())
            .unwrap();
        assert_eq!(merged, only);
    }

    #[test]
    fn test_union_preserves_order_and_sums() {
        let a = result("seg-0", vec![json!({"n": 1}), json!({"n": 2})], 30);
        let b = result("seg-1", vec![json!({"n": 3})], 80).with_reported_total(5);
        let c = result("seg-2", vec![json!({"n": 2})], 10);

        let merged = ResultMerger::new()
            .merge(vec![a, b, c], &MergeStrategy::Union, &job())
            .unwrap();
        assert_eq!(merged.job_id, "job-1");
        assert_eq!(merged.total_rows, 2 + 5 + 1);
        assert_eq!(merged.execution_time_ms, 80);
        let ns: Vec<i64> = merged.data.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![1, 2, 3, 2]);
        assert_eq!(merged.columns, vec![ColumnInfo::new("n", ColumnType::Integer)]);
        assert_eq!(merged.metadata["merged_from"], json!(3));
    }

    #[test]
    fn test_intersection_on_key_columns() {
        let a = result(
            "a",
            vec![json!({"host": "h1", "v": 1}), json!({"host": "h2", "v": 2}), json!({"host": "h1", "v": 9})],
            5,
        );
        let b = result("b", vec![json!({"host": "h1", "v": 7}), json!({"host": "h3"})], 9);

        let merged = ResultMerger::new()
            .merge(
                vec![a, b],
                &MergeStrategy::Intersection {
                    key_columns: vec!["host".into()],
                },
                &job(),
            )
            .unwrap();
        assert_eq!(merged.total_rows, 1);
        assert_eq!(merged.data[0]["v"], json!(1));
        assert_eq!(merged.execution_time_ms, 9);
        assert_eq!(merged.metadata["merge_strategy"], json!("intersection"));
    }

    #[test]
    fn test_custom_is_unsupported() {
        let err = ResultMerger::new()
            .merge(
                vec![result("a", vec![], 1), result("b", vec![], 1)],
                &MergeStrategy::Custom { name: "topk".into() },
                &job(),
            )
            .unwrap_err();
        assert_eq!(err, QueryError::UnsupportedMergeStrategy("topk".into()));
    }
}

//! 并行查询计划
//!
//! 计划由规划器一次性生成，返回后不再修改。

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{CoreResult, QueryError};
use crate::core::types::{JobPriority, ParamMap, TimeRange};

/// 合并策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeStrategy {
    /// 按输入顺序拼接
    Union,
    /// 按键列做集合交集
    Intersection { key_columns: Vec<String> },
    /// 自定义合并，尚未支持
    Custom { name: String },
}

impl MergeStrategy {
    pub fn name(&self) -> &str {
        match self {
            MergeStrategy::Union => "union",
            MergeStrategy::Intersection { .. } => "intersection",
            MergeStrategy::Custom { name } => name,
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 子查询的执行目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubqueryTarget {
    Relational,
    SearchIndex { index: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    Time,
    Index,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSegment {
    pub id: String,
    pub condition: String,
    pub estimated_rows: f64,
    pub estimated_cost: f64,
}

/// 数据分区描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPartition {
    pub kind: PartitionKind,
    /// 分区依据的字段（时间列或索引名）
    pub field: String,
    pub segments: Vec<PartitionSegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelSubquery {
    pub id: String,
    pub query: String,
    pub target: SubqueryTarget,
    pub params: ParamMap,
    pub time_range: Option<TimeRange>,
    pub partition: Option<DataPartition>,
    pub priority: JobPriority,
    /// 必须先完成的子查询 id
    pub depends_on: Vec<String>,
}

impl ParallelSubquery {
    pub fn new(id: impl Into<String>, query: impl Into<String>, target: SubqueryTarget) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            target,
            params: ParamMap::new(),
            time_range: None,
            partition: None,
            priority: JobPriority::default(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: ParamMap) -> Self {
        self.params = params;
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn with_partition(mut self, partition: DataPartition) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

/// 并行化决策
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelQueryPlan {
    pub can_parallelize: bool,
    pub subqueries: Vec<ParallelSubquery>,
    pub merge_strategy: MergeStrategy,
    pub estimated_speedup: f64,
}

impl ParallelQueryPlan {
    /// 不可并行的计划，子查询列表总是为空
    pub fn not_parallelizable() -> Self {
        Self {
            can_parallelize: false,
            subqueries: Vec::new(),
            merge_strategy: MergeStrategy::Union,
            estimated_speedup: 1.0,
        }
    }

    pub fn parallel(
        subqueries: Vec<ParallelSubquery>,
        merge_strategy: MergeStrategy,
        estimated_speedup: f64,
    ) -> Self {
        if subqueries.is_empty() {
            return Self::not_parallelizable();
        }
        Self {
            can_parallelize: true,
            subqueries,
            merge_strategy,
            estimated_speedup,
        }
    }

    /// 少于两个子查询的计划按不可并行处理
    pub fn is_worth_running(&self) -> bool {
        self.can_parallelize && self.subqueries.len() >= 2
    }

    /// 检查所有依赖都指向同一计划中的子查询
    pub fn validate_dependencies(&self) -> CoreResult<()> {
        let ids: HashSet<&str> = self.subqueries.iter().map(|s| s.id.as_str()).collect();
        if ids.len() != self.subqueries.len() {
            return Err(QueryError::ParallelPlanning("子查询 id 重复".to_string()));
        }
        for sq in &self.subqueries {
            if let Some(missing) = sq.depends_on.iter().find(|d| !ids.contains(d.as_str())) {
                return Err(QueryError::ParallelPlanning(format!(
                    "子查询 {} 依赖不存在的子查询 {}",
                    sq.id, missing
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_parallel_plan_collapses() {
        let plan = ParallelQueryPlan::parallel(Vec::new(), MergeStrategy::Union, 3.0);
        assert!(!plan.can_parallelize);
        assert!(plan.subqueries.is_empty());
        assert!(!plan.is_worth_running());
    }

    #[test]
    fn test_single_subquery_not_worth_running() {
        let plan = ParallelQueryPlan::parallel(
            vec![ParallelSubquery::new("a", "SELECT 1", SubqueryTarget::Relational)],
            MergeStrategy::Union,
            1.0,
        );
        assert!(plan.can_parallelize);
        assert!(!plan.is_worth_running());
    }

    #[test]
    fn test_dangling_dependency_detected() {
        let plan = ParallelQueryPlan::parallel(
            vec![
                ParallelSubquery::new("a", "SELECT 1", SubqueryTarget::Relational),
                ParallelSubquery::new("b", "SELECT 2", SubqueryTarget::Relational).depends_on("zz"),
            ],
            MergeStrategy::Union,
            1.5,
        );
        let err = plan.validate_dependencies().unwrap_err();
        assert!(err.to_string().contains("zz"));
    }

    #[test]
    fn test_merge_strategy_serialization() {
        let s = serde_json::to_value(MergeStrategy::Intersection {
            key_columns: vec!["id".into()],
        })
        .unwrap();
        assert_eq!(s["kind"], "intersection");
        assert_eq!(MergeStrategy::Custom { name: "topk".into() }.name(), "topk");
    }
}

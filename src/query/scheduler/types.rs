use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::error::CoreResult;
use crate::core::types::QueryResult;
use crate::query::planner::ParallelSubquery;

/// 子查询执行器
///
/// 每次执行恰好获取并归还一个池化连接
#[async_trait]
pub trait SubqueryExecutor: Send + Sync {
    async fn execute_subquery(&self, subquery: &ParallelSubquery) -> CoreResult<QueryResult>;
}

/// 单个子查询的执行记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubqueryTiming {
    pub id: String,
    pub elapsed: Duration,
}

/// 一次并行运行的报告
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    /// 观察到的最大在途子查询数
    pub max_in_flight: usize,
    /// 按完成顺序记录
    pub completions: Vec<SubqueryTiming>,
    /// 因依赖成环或悬空而按原样调度的子查询数
    pub unordered: usize,
}

impl RunReport {
    pub fn completion_order(&self) -> Vec<&str> {
        self.completions.iter().map(|t| t.id.as_str()).collect()
    }
}

//! 有界并发的子查询运行器
//!
//! 子查询按依赖排序后逐个准入在途集合，在途数量达到上限时等待最先完成的任务
//! （先完成先出，而非先进先出）。完成的任务按任务 id 从在途集合移除。

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};

use super::execution_schedule::ExecutionSchedule;
use super::types::{RunReport, SubqueryExecutor, SubqueryTiming};
use crate::core::error::{CoreResult, QueryError};
use crate::core::types::QueryResult;
use crate::query::planner::ParallelSubquery;

type TaskOutput = (usize, CoreResult<QueryResult>, Duration);

#[derive(Debug, Clone)]
pub struct ParallelRunner {
    max_concurrency: usize,
}

impl ParallelRunner {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// 运行全部子查询，结果按依赖排序后的顺序返回
    pub async fn run(
        &self,
        subqueries: &[ParallelSubquery],
        executor: &dyn SubqueryExecutor,
    ) -> CoreResult<Vec<QueryResult>> {
        self.run_with_report(subqueries, executor)
            .await
            .map(|(results, _)| results)
    }

    /// 任一子查询失败即终止整个运行，其余在途任务被丢弃
    pub async fn run_with_report(
        &self,
        subqueries: &[ParallelSubquery],
        executor: &dyn SubqueryExecutor,
    ) -> CoreResult<(Vec<QueryResult>, RunReport)> {
        let schedule = ExecutionSchedule::build(subqueries);
        let ordered = &schedule.ordered;

        let mut state = RunState {
            ordered,
            in_flight: HashMap::new(),
            completed: HashSet::new(),
            results: vec![None; ordered.len()],
            report: RunReport {
                unordered: schedule.unordered,
                ..RunReport::default()
            },
        };
        let mut tasks = FuturesUnordered::new();

        for (task_id, subquery) in ordered.iter().copied().enumerate() {
            while tasks.len() >= self.max_concurrency {
                state.wait_next(&mut tasks).await?;
            }
            // 依赖仍在途时等待其完成；既未完成也不在途的依赖（成环或悬空）被忽略
            while subquery
                .depends_on
                .iter()
                .any(|dep| state.is_in_flight(dep))
            {
                state.wait_next(&mut tasks).await?;
            }

            log::debug!("准入子查询 {} (在途 {})", subquery.id, tasks.len() + 1);
            state.in_flight.insert(task_id, subquery.id.as_str());
            tasks.push(async move {
                let started = Instant::now();
                let result = executor.execute_subquery(subquery).await;
                (task_id, result, started.elapsed())
            });
            state.report.max_in_flight = state.report.max_in_flight.max(tasks.len());
        }

        while !tasks.is_empty() {
            state.wait_next(&mut tasks).await?;
        }

        let results = state
            .results
            .into_iter()
            .zip(ordered.iter())
            .map(|(result, sq)| {
                result.ok_or_else(|| {
                    QueryError::ParallelExecution(format!("子查询 {} 没有产生结果", sq.id))
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok((results, state.report))
    }
}

struct RunState<'a> {
    ordered: &'a [&'a ParallelSubquery],
    /// 任务 id -> 子查询 id
    in_flight: HashMap<usize, &'a str>,
    completed: HashSet<&'a str>,
    results: Vec<Option<QueryResult>>,
    report: RunReport,
}

impl<'a> RunState<'a> {
    fn is_in_flight(&self, subquery_id: &str) -> bool {
        !self.completed.contains(subquery_id) && self.in_flight.values().any(|id| *id == subquery_id)
    }

    async fn wait_next<S>(&mut self, tasks: &mut S) -> CoreResult<()>
    where
        S: futures::Stream<Item = TaskOutput> + Unpin,
    {
        let Some((task_id, result, elapsed)) = tasks.next().await else {
            return Ok(());
        };
        let id = self
            .in_flight
            .remove(&task_id)
            .unwrap_or_else(|| self.ordered[task_id].id.as_str());

        match result {
            Ok(result) => {
                log::debug!("子查询 {} 完成，{} 行，耗时 {:?}", id, result.row_count(), elapsed);
                self.completed.insert(id);
                self.results[task_id] = Some(result);
                self.report.completions.push(SubqueryTiming {
                    id: id.to_string(),
                    elapsed,
                });
                Ok(())
            }
            Err(e) => {
                log::warn!("子查询 {} 失败: {}", id, e);
                Err(QueryError::ParallelExecution(format!("子查询 {} 执行失败: {}", id, e)))
            }
        }
    }
}

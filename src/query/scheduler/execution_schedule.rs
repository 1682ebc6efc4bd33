use std::collections::HashSet;

use crate::query::planner::ParallelSubquery;

/// 按依赖排好序的子查询
#[derive(Debug)]
pub struct ExecutionSchedule<'a> {
    pub ordered: Vec<&'a ParallelSubquery>,
    /// 末尾按原顺序追加、依赖无法满足的子查询数
    pub unordered: usize,
}

impl<'a> ExecutionSchedule<'a> {
    /// 贪心拓扑排序
    ///
    /// 每轮取出所有依赖都已排入的子查询；某一轮没有任何子查询满足条件时
    /// （成环或依赖悬空），剩余子查询按原顺序追加，不会死锁
    pub fn build(subqueries: &'a [ParallelSubquery]) -> Self {
        let mut ordered: Vec<&ParallelSubquery> = Vec::with_capacity(subqueries.len());
        let mut scheduled: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&ParallelSubquery> = subqueries.iter().collect();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) = remaining
                .into_iter()
                .partition(|sq| sq.depends_on.iter().all(|d| scheduled.contains(d.as_str())));

            if ready.is_empty() {
                log::warn!(
                    "{} 个子查询的依赖无法满足（成环或悬空），按原顺序调度",
                    blocked.len()
                );
                let unordered = blocked.len();
                ordered.extend(blocked);
                return Self { ordered, unordered };
            }

            for sq in &ready {
                scheduled.insert(sq.id.as_str());
            }
            ordered.extend(ready);
            remaining = blocked;
        }

        Self {
            ordered,
            unordered: 0,
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.ordered.iter().map(|sq| sq.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::planner::SubqueryTarget;

    fn sq(id: &str, deps: &[&str]) -> ParallelSubquery {
        deps.iter().fold(
            ParallelSubquery::new(id, "SELECT 1", SubqueryTarget::Relational),
            |s, d| s.depends_on(*d),
        )
    }

    #[test]
    fn test_dependencies_come_first() {
        let subqueries = vec![sq("c", &["a", "b"]), sq("b", &["a"]), sq("a", &[]), sq("d", &[])];
        let schedule = ExecutionSchedule::build(&subqueries);
        assert_eq!(schedule.ids(), vec!["a", "d", "b", "c"]);
        assert_eq!(schedule.unordered, 0);
    }

    #[test]
    fn test_cycle_appended_as_is() {
        let subqueries = vec![sq("x", &["y"]), sq("y", &["x"]), sq("z", &[]), sq("w", &["missing"])];
        let schedule = ExecutionSchedule::build(&subqueries);
        assert_eq!(schedule.ids(), vec!["z", "x", "y", "w"]);
        assert_eq!(schedule.unordered, 3);
    }
}

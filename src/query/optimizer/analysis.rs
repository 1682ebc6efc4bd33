//! 执行计划分析
//!
//! 遍历后端返回的计划树，为每个可疑节点生成一条警告。

use crate::backend::PlanNode;

/// 分析阈值
#[derive(Debug, Clone, Copy)]
pub struct PlanThresholds {
    /// 顺序扫描的估计行数阈值
    pub seq_scan_rows: f64,
    /// 嵌套循环连接的估计行数阈值
    pub nested_loop_rows: f64,
}

impl Default for PlanThresholds {
    fn default() -> Self {
        Self {
            seq_scan_rows: 100_000.0,
            nested_loop_rows: 10_000.0,
        }
    }
}

/// 计划估算摘要
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEstimate {
    pub cost: f64,
    pub rows: f64,
    pub warnings: Vec<String>,
}

pub fn analyze_plan(root: &PlanNode, thresholds: PlanThresholds) -> PlanEstimate {
    let mut warnings = Vec::new();

    root.walk(&mut |node| {
        let relation = node.relation_name.as_deref().unwrap_or("?");
        match node.node_type.as_str() {
            "Seq Scan" => {
                if node.plan_rows > thresholds.seq_scan_rows {
                    warnings.push(format!(
                        "表 {} 上的顺序扫描预计读取 {:.0} 行",
                        relation, node.plan_rows
                    ));
                }
                if let Some(filter) = &node.filter {
                    warnings.push(format!(
                        "表 {} 上的过滤条件 {} 没有可用索引",
                        relation, filter
                    ));
                }
            }
            "Nested Loop" if node.plan_rows > thresholds.nested_loop_rows => {
                warnings.push(format!(
                    "嵌套循环连接预计产生 {:.0} 行",
                    node.plan_rows
                ));
            }
            _ => {}
        }
    });

    PlanEstimate {
        cost: root.total_cost,
        rows: root.plan_rows,
        warnings,
    }
}

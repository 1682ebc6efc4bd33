//! 执行计划节点树
//!
//! 与 PostgreSQL `EXPLAIN (FORMAT JSON)` 的节点字段对应

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{CoreResult, QueryError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    #[serde(rename = "Node Type")]
    pub node_type: String,
    #[serde(rename = "Total Cost", default)]
    pub total_cost: f64,
    #[serde(rename = "Plan Rows", default)]
    pub plan_rows: f64,
    #[serde(rename = "Relation Name", default, skip_serializing_if = "Option::is_none")]
    pub relation_name: Option<String>,
    #[serde(rename = "Index Name", default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(rename = "Filter", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(rename = "Plans", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    pub fn new(node_type: impl Into<String>, total_cost: f64, plan_rows: f64) -> Self {
        Self {
            node_type: node_type.into(),
            total_cost,
            plan_rows,
            relation_name: None,
            index_name: None,
            filter: None,
            children: Vec::new(),
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation_name = Some(relation.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_child(mut self, child: PlanNode) -> Self {
        self.children.push(child);
        self
    }

    /// 解析 `EXPLAIN (FORMAT JSON)` 输出
    ///
    /// 接受 `[{"Plan": {...}}]`、`{"Plan": {...}}` 或直接的节点对象
    pub fn from_explain_json(value: &Value) -> CoreResult<PlanNode> {
        let node = match value {
            Value::Array(items) => items
                .first()
                .ok_or_else(|| QueryError::Backend("执行计划为空".to_string()))?,
            other => other,
        };
        let node = node.get("Plan").unwrap_or(node);
        serde_json::from_value(node.clone())
            .map_err(|e| QueryError::Backend(format!("无法解析执行计划: {}", e)))
    }

    /// 深度优先遍历所有节点（含自身）
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a PlanNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_postgres_explain() {
        let explain = json!([{
            "Plan": {
                "Node Type": "Hash Join",
                "Total Cost": 1520.5,
                "Plan Rows": 300,
                "Plans": [
                    {"Node Type": "Seq Scan", "Relation Name": "events", "Total Cost": 900.0,
                     "Plan Rows": 250000, "Filter": "(severity = 'high'::text)"},
                    {"Node Type": "Index Scan", "Relation Name": "hosts", "Index Name": "hosts_pkey",
                     "Total Cost": 20.0, "Plan Rows": 10}
                ]
            }
        }]);
        let plan = PlanNode::from_explain_json(&explain).unwrap();
        assert_eq!(plan.node_type, "Hash Join");
        assert_eq!(plan.children.len(), 2);
        assert_eq!(plan.children[0].relation_name.as_deref(), Some("events"));

        let mut types = Vec::new();
        plan.walk(&mut |n| types.push(n.node_type.clone()));
        assert_eq!(types, vec!["Hash Join", "Seq Scan", "Index Scan"]);
    }

    #[test]
    fn test_empty_explain_is_error() {
        assert!(PlanNode::from_explain_json(&json!([])).is_err());
    }
}

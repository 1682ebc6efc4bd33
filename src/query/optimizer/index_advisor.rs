//! 索引建议
//!
//! 从 WHERE 中的等值/范围谓词以及 JOIN ... ON 的连接条件推导缺失索引的建议语句。

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::core::error::{CoreResult, QueryError};

const NOT_AN_ALIAS: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "cross", "outer", "on", "group", "order",
    "limit", "having", "union", "as",
];

#[derive(Debug, Clone)]
pub struct IndexAdvisor {
    tables: Regex,
    literals: Regex,
    where_clause: Regex,
    predicate: Regex,
    join_condition: Regex,
}

impl IndexAdvisor {
    pub fn new() -> CoreResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| QueryError::Optimization(format!("索引建议模式无效: {}", e)))
        };
        Ok(Self {
            tables: compile(r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_][\w.]*)(?:\s+(?:AS\s+)?([A-Za-z_]\w*))?")?,
            literals: compile(r"'(?:[^']|'')*'")?,
            where_clause: compile(
                r"(?is)\bWHERE\b(.*?)(?:\bGROUP\s+BY\b|\bORDER\s+BY\b|\bHAVING\b|\bLIMIT\b|$)",
            )?,
            predicate: compile(
                r"(?i)\b(?:([A-Za-z_]\w*)\.)?([A-Za-z_]\w*)\s*(?:=|<>|!=|>=|<=|>|<|\s+BETWEEN\b|\s+IN\s*\()",
            )?,
            join_condition: compile(
                r"(?i)\bON\s+(?:([A-Za-z_]\w*)\.)?([A-Za-z_]\w*)\s*=\s*(?:([A-Za-z_]\w*)\.)?([A-Za-z_]\w*)",
            )?,
        })
    }

    /// 生成去重后的索引建议，按发现顺序
    pub fn suggest(&self, query: &str) -> Vec<String> {
        let text = self.literals.replace_all(query, "''");
        let aliases = self.table_aliases(&text);
        let default_table = self
            .tables
            .captures(&text)
            .map(|caps| caps[1].to_string());

        let mut columns: Vec<(Option<String>, String)> = Vec::new();
        if let Some(clause) = self.where_clause.captures(&text) {
            for caps in self.predicate.captures_iter(&clause[1]) {
                columns.push((caps.get(1).map(|m| m.as_str().to_string()), caps[2].to_string()));
            }
        }
        for caps in self.join_condition.captures_iter(&text) {
            columns.push((caps.get(1).map(|m| m.as_str().to_string()), caps[2].to_string()));
            columns.push((caps.get(3).map(|m| m.as_str().to_string()), caps[4].to_string()));
        }

        let mut suggestions: Vec<String> = Vec::new();
        for (qualifier, column) in columns {
            let table = match qualifier {
                Some(q) => aliases.get(&q.to_lowercase()).cloned().unwrap_or(q),
                // 无限定列只在单表查询中可以确定归属
                None if aliases.values().collect::<HashSet<_>>().len() <= 1 => {
                    match &default_table {
                        Some(t) => t.clone(),
                        None => continue,
                    }
                }
                None => continue,
            };
            let statement = format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {} ({})",
                table.replace('.', "_"),
                column,
                table,
                column
            );
            if !suggestions.contains(&statement) {
                suggestions.push(statement);
            }
        }
        suggestions
    }

    /// 别名（以及表名自身）到表名的映射，键为小写
    fn table_aliases(&self, text: &str) -> HashMap<String, String> {
        let mut aliases = HashMap::new();
        for caps in self.tables.captures_iter(text) {
            let table = caps[1].to_string();
            aliases.insert(table.to_lowercase(), table.clone());
            if let Some(alias) = caps.get(2) {
                let alias = alias.as_str().to_lowercase();
                if !NOT_AN_ALIAS.contains(&alias.as_str()) {
                    aliases.insert(alias, table);
                }
            }
        }
        aliases
    }
}

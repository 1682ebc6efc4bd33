//! 基于模式的改写规则
//!
//! 每条规则由（检测谓词、改写函数、描述）组成，按顺序作用于当前文本。
//! 只有改写真正改变了文本时，规则描述才会被记录。
//! 所有规则都只做保持语义的局部改写。

use regex::{Captures, Regex};

use crate::core::error::{CoreResult, QueryError};

type RewriteFn = fn(&Regex, &str) -> CoreResult<String>;

/// 单条改写规则
#[derive(Debug, Clone)]
pub struct RewriteRule {
    name: &'static str,
    description: &'static str,
    pattern: Regex,
    rewrite: RewriteFn,
}

impl RewriteRule {
    pub fn new(
        name: &'static str,
        description: &'static str,
        pattern: &str,
        rewrite: RewriteFn,
    ) -> CoreResult<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| QueryError::Optimization(format!("规则 {} 的模式无效: {}", name, e)))?;
        Ok(Self {
            name,
            description,
            pattern,
            rewrite,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    /// 检测谓词
    pub fn matches(&self, query: &str) -> bool {
        self.pattern.is_match(query)
    }

    pub fn apply(&self, query: &str) -> CoreResult<String> {
        (self.rewrite)(&self.pattern, query)
    }
}

/// 规则应用结果
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteOutcome {
    pub query: String,
    /// 实际改变了文本的规则描述，按应用顺序
    pub applied: Vec<String>,
}

/// 按顺序应用规则
///
/// 每条规则看到的是前面规则改写后的文本
pub fn apply_rules(rules: &[RewriteRule], query: &str) -> CoreResult<RewriteOutcome> {
    let mut current = query.to_string();
    let mut applied = Vec::new();

    for rule in rules {
        if !rule.matches(&current) {
            continue;
        }
        let rewritten = rule.apply(&current)?;
        if rewritten != current {
            log::debug!("改写规则 {} 生效", rule.name());
            applied.push(rule.description().to_string());
            current = rewritten;
        }
    }

    Ok(RewriteOutcome {
        query: current,
        applied,
    })
}

/// 内置规则集
pub fn default_rules() -> CoreResult<Vec<RewriteRule>> {
    Ok(vec![
        RewriteRule::new(
            "strip_trailing_semicolon",
            "移除语句末尾的分号",
            r";\s*$",
            |re, q| Ok(re.replace(q, "").trim_end().to_string()),
        )?,
        RewriteRule::new(
            "redundant_true_predicate",
            "移除恒真谓词 1=1",
            r"(?i)(\bWHERE\s+1\s*=\s*1\s+AND\s+)|(\s+AND\s+1\s*=\s*1\b)",
            |re, q| {
                Ok(re
                    .replace_all(q, |caps: &Captures| {
                        if caps.get(1).is_some() {
                            "WHERE ".to_string()
                        } else {
                            String::new()
                        }
                    })
                    .into_owned())
            },
        )?,
        RewriteRule::new(
            "count_one_to_count_star",
            "COUNT(1) 改写为 COUNT(*)",
            r"(?i)\bCOUNT\s*\(\s*1\s*\)",
            |re, q| Ok(re.replace_all(q, "COUNT(*)").into_owned()),
        )?,
        RewriteRule::new(
            "single_value_in_to_equality",
            "单值 IN 列表改写为等值比较",
            r"(?i)\b([A-Za-z_][\w.]*)(\s+NOT)?\s+IN\s*\(\s*('(?:[^']|'')*'|-?\d+(?:\.\d+)?)\s*\)",
            |re, q| {
                Ok(re
                    .replace_all(q, |caps: &Captures| {
                        let op = if caps.get(2).is_some() { "<>" } else { "=" };
                        format!("{} {} {}", &caps[1], op, &caps[3])
                    })
                    .into_owned())
            },
        )?,
        RewriteRule::new(
            "literal_like_to_equality",
            "无通配符且无转义的 LIKE 改写为等值比较",
            r"(?i)(\bNOT\s+)?\bLIKE\s+'([^'%_\\]*)'",
            |re, q| {
                Ok(re
                    .replace_all(q, |caps: &Captures| {
                        let op = if caps.get(1).is_some() { "<>" } else { "=" };
                        format!("{} '{}'", op, &caps[2])
                    })
                    .into_owned())
            },
        )?,
        RewriteRule::new(
            "or_equalities_to_in",
            "同列 OR 等值合并为 IN 列表",
            r"(?i)\(\s*([A-Za-z_][\w.]*)\s*=\s*('[^']*'|-?\d+)\s+OR\s+([A-Za-z_][\w.]*)\s*=\s*('[^']*'|-?\d+)\s*\)",
            |re, q| {
                Ok(re
                    .replace_all(q, |caps: &Captures| {
                        if caps[1].eq_ignore_ascii_case(&caps[3]) {
                            format!("{} IN ({}, {})", &caps[1], &caps[2], &caps[4])
                        } else {
                            caps[0].to_string()
                        }
                    })
                    .into_owned())
            },
        )?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(query: &str) -> RewriteOutcome {
        apply_rules(&default_rules().unwrap(), query).unwrap()
    }

    #[test]
    fn test_unchanged_query_records_nothing() {
        let outcome = rewrite("SELECT host FROM events WHERE severity = 'high'");
        assert_eq!(outcome.query, "SELECT host FROM events WHERE severity = 'high'");
        assert!(outcome.applied.is_empty());
    }

    #[test]
    fn test_rules_chain_on_rewritten_text() {
        let outcome = rewrite("SELECT COUNT(1) FROM events WHERE 1=1 AND host IN ('fw-1');");
        assert_eq!(outcome.query, "SELECT COUNT(*) FROM events WHERE host = 'fw-1'");
        assert_eq!(outcome.applied.len(), 4);
    }

    #[test]
    fn test_negated_forms_keep_semantics() {
        let outcome = rewrite("SELECT * FROM t WHERE a NOT IN (3) AND b NOT LIKE 'x'");
        assert_eq!(outcome.query, "SELECT * FROM t WHERE a <> 3 AND b <> 'x'");
    }

    #[test]
    fn test_like_with_wildcard_untouched() {
        let outcome = rewrite("SELECT * FROM t WHERE b LIKE 'adm%' OR c ILIKE 'x'");
        assert_eq!(outcome.query, "SELECT * FROM t WHERE b LIKE 'adm%' OR c ILIKE 'x'");
    }

    #[test]
    fn test_escaped_like_untouched() {
        let outcome = rewrite(r"SELECT * FROM t WHERE b LIKE 'a\_b' OR c LIKE 'C:\tmp'");
        assert_eq!(outcome.query, r"SELECT * FROM t WHERE b LIKE 'a\_b' OR c LIKE 'C:\tmp'");
        assert!(outcome.applied.is_empty());
    }

    #[test]
    fn test_or_to_in_only_for_same_column() {
        let outcome = rewrite("SELECT * FROM t WHERE (port = 22 OR port = 23) AND (a = 1 OR b = 2)");
        assert_eq!(
            outcome.query,
            "SELECT * FROM t WHERE port IN (22, 23) AND (a = 1 OR b = 2)"
        );
        assert_eq!(outcome.applied, vec!["同列 OR 等值合并为 IN 列表".to_string()]);
    }
}

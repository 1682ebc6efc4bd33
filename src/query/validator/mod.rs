//! 查询验证
//!
//! 拒绝空查询；关系型路径（含转换后的领域查询）上拒绝包含破坏性关键字的查询，
//! 最后通过后端执行计划确认语法有效。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::backend::{PooledConnection, RelationalBackend, SearchRequest};
use crate::core::error::{CoreResult, QueryError};
use crate::core::types::QueryLanguage;
use crate::query::optimizer::DslTranslator;

pub const DESTRUCTIVE_KEYWORDS: &[&str] =
    &["DROP", "DELETE", "TRUNCATE", "ALTER", "CREATE", "INSERT", "UPDATE"];

/// 验证结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn into_result(self) -> CoreResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(QueryError::Validation(self.errors.join("; ")))
        }
    }
}

fn destructive_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)\b({})\b", DESTRUCTIVE_KEYWORDS.join("|"))).expect("static regex")
    })
}

fn string_literal() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'(?:[^']|'')*'").expect("static regex"))
}

/// 查找破坏性关键字，字符串字面量中的内容不计
pub fn find_destructive_keyword(sql: &str) -> Option<String> {
    let stripped = string_literal().replace_all(sql, "''");
    destructive_pattern()
        .captures(&stripped)
        .map(|caps| caps[1].to_ascii_uppercase())
}

pub struct QueryValidator {
    relational: Option<Arc<dyn RelationalBackend>>,
    translator: DslTranslator,
}

impl QueryValidator {
    /// `relational` 为空时跳过执行计划语法检查
    pub fn new(relational: Option<Arc<dyn RelationalBackend>>, translator: DslTranslator) -> Self {
        Self {
            relational,
            translator,
        }
    }

    /// 不访问后端的检查；返回需要做语法检查的 SQL
    pub fn check_static(&self, language: QueryLanguage, query: &str) -> (Vec<String>, Option<String>) {
        if query.trim().is_empty() {
            return (vec!["查询语句为空".to_string()], None);
        }

        let sql = match language {
            QueryLanguage::Sql => query.to_string(),
            QueryLanguage::Dsl => match self.translator.translate(query) {
                Ok(sql) => sql,
                Err(e) => return (vec![e.to_string()], None),
            },
            QueryLanguage::SearchIndex => {
                let errors = match SearchRequest::parse(query) {
                    Ok(_) => Vec::new(),
                    Err(e) => vec![e.to_string()],
                };
                return (errors, None);
            }
        };

        match find_destructive_keyword(&sql) {
            Some(keyword) => (vec![format!("查询包含禁止的操作: {}", keyword)], None),
            None => (Vec::new(), Some(sql)),
        }
    }

    pub async fn validate(&self, language: QueryLanguage, query: &str) -> ValidationReport {
        let (mut errors, sql) = self.check_static(language, query);

        if let (Some(sql), Some(backend)) = (sql, &self.relational) {
            if let Err(e) = explain(backend.as_ref(), &sql).await {
                errors.push(format!("语法检查失败: {}", e));
            }
        }

        if !errors.is_empty() {
            log::debug!("查询验证未通过: {:?}", errors);
        }
        ValidationReport::from_errors(errors)
    }
}

async fn explain(backend: &dyn RelationalBackend, sql: &str) -> CoreResult<()> {
    let mut conn = PooledConnection::acquire(backend).await?;
    conn.explain(sql).await.map(|_| ())
}

impl std::fmt::Debug for QueryValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryValidator")
            .field("syntax_check", &self.relational.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryRelationalBackend;
    use crate::config::OptimizerConfig;

    fn validator(backend: Option<MemoryRelationalBackend>) -> QueryValidator {
        QueryValidator::new(
            backend.map(|b| Arc::new(b) as Arc<dyn RelationalBackend>),
            DslTranslator::new(&OptimizerConfig::default()),
        )
    }

    #[test]
    fn test_keyword_detection() {
        assert_eq!(find_destructive_keyword("drop table users").as_deref(), Some("DROP"));
        assert_eq!(
            find_destructive_keyword("SELECT * FROM t; DELETE FROM t").as_deref(),
            Some("DELETE")
        );
        assert_eq!(find_destructive_keyword("SELECT updated_at, created FROM t"), None);
        assert_eq!(find_destructive_keyword("SELECT * FROM audit WHERE action = 'DELETE'"), None);
    }

    #[tokio::test]
    async fn test_drop_table_rejected() {
        let report = validator(None).validate(QueryLanguage::Sql, "DROP TABLE users").await;
        assert!(!report.valid);
        assert!(report.errors[0].contains("DROP"));
    }

    #[tokio::test]
    async fn test_empty_rejected() {
        let report = validator(None).validate(QueryLanguage::SearchIndex, "  ").await;
        assert!(!report.valid);
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn test_syntax_checked_through_explain() {
        let backend = MemoryRelationalBackend::from_rows(Vec::new()).with_explain(|sql| {
            if sql.contains("SELEC ") {
                Err(QueryError::Backend("syntax error at or near \"SELEC\"".into()))
            } else {
                Ok(crate::backend::PlanNode::new("Result", 0.01, 1.0))
            }
        });
        let v = validator(Some(backend.clone()));

        assert!(v.validate(QueryLanguage::Sql, "SELECT 1").await.valid);
        let report = v.validate(QueryLanguage::Sql, "SELEC * FROM t").await;
        assert!(!report.valid);
        assert!(report.errors[0].contains("SELEC"));
        assert_eq!(backend.stats().released, 2);
    }

    #[tokio::test]
    async fn test_dsl_validated_after_translation() {
        let v = validator(None);
        assert!(v.validate(QueryLanguage::Dsl, "severity:high last 1h").await.valid);
        assert!(!v.validate(QueryLanguage::Dsl, "last forever").await.valid);
    }
}

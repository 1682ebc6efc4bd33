//! 领域查询语言到 SQL 的转换
//!
//! 支持的写法：
//! - `from <table>` 指定表
//! - `last <N><m|h|d>` 时间窗口，生成范围谓词并按时间倒序
//! - `limit <N>` 行数上限，未指定时追加默认安全上限
//! - `field:value` 等值谓词
//! - `field contains text` 模糊匹配谓词
//! - 其余裸词合并为一个全文检索谓词
//! - `and` 连接词被忽略

use std::sync::OnceLock;

use regex::Regex;

use crate::config::OptimizerConfig;
use crate::core::error::{CoreResult, QueryError};

#[derive(Debug, Clone)]
pub struct DslTranslator {
    default_table: String,
    default_limit: u64,
    text_column: String,
    time_column: String,
}

impl DslTranslator {
    pub fn new(config: &OptimizerConfig) -> Self {
        Self {
            default_table: config.dsl_default_table.clone(),
            default_limit: config.dsl_default_limit,
            text_column: config.dsl_text_column.clone(),
            time_column: config.dsl_time_column.clone(),
        }
    }

    pub fn translate(&self, dsl: &str) -> CoreResult<String> {
        let tokens = tokenize(dsl)?;
        if tokens.is_empty() {
            return Err(QueryError::Validation("查询语句为空".to_string()));
        }

        let mut table = self.default_table.clone();
        let mut limit = None;
        let mut window = None;
        let mut predicates = Vec::new();
        let mut terms = Vec::new();

        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i].as_str();
            let next = tokens.get(i + 1).map(String::as_str);
            match token.to_lowercase().as_str() {
                "and" => {}
                "from" => {
                    let name = next.ok_or_else(|| missing_operand("from"))?;
                    table = identifier(name)?.to_string();
                    i += 1;
                }
                "limit" => {
                    let n = next.ok_or_else(|| missing_operand("limit"))?;
                    limit = Some(n.parse::<u64>().map_err(|_| {
                        QueryError::Validation(format!("无效的 limit 值: {}", n))
                    })?);
                    i += 1;
                }
                "last" => {
                    let w = next.ok_or_else(|| missing_operand("last"))?;
                    window = Some(parse_window(w)?);
                    i += 1;
                }
                _ => {
                    let is_contains = tokens
                        .get(i + 1)
                        .is_some_and(|t| t.eq_ignore_ascii_case("contains"));
                    if is_contains && is_identifier(token) {
                        let text = tokens.get(i + 2).ok_or_else(|| missing_operand("contains"))?;
                        predicates.push(format!("{} ILIKE '%{}%'", token, escape(text)));
                        i += 2;
                    } else if let Some((field, value)) = split_field(token) {
                        predicates.push(format!("{} = {}", field, literal(value)));
                    } else {
                        terms.push(token.to_string());
                    }
                }
            }
            i += 1;
        }

        if !terms.is_empty() {
            predicates.push(format!(
                "to_tsvector('simple', {}) @@ plainto_tsquery('simple', '{}')",
                self.text_column,
                escape(&terms.join(" "))
            ));
        }
        if let Some((amount, unit)) = window {
            predicates.push(format!(
                "{} >= NOW() - INTERVAL '{} {}'",
                self.time_column, amount, unit
            ));
        }

        let mut sql = format!("SELECT * FROM {}", table);
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        if window.is_some() {
            sql.push_str(&format!(" ORDER BY {} DESC", self.time_column));
        }
        sql.push_str(&format!(" LIMIT {}", limit.unwrap_or(self.default_limit)));
        Ok(sql)
    }
}

fn missing_operand(keyword: &str) -> QueryError {
    QueryError::Validation(format!("{} 后缺少参数", keyword))
}

/// 按空白切分，双引号内的空白保留
fn tokenize(input: &str) -> CoreResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for ch in input.chars() {
        match ch {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if quoted {
        return Err(QueryError::Validation("引号未闭合".to_string()));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn identifier(s: &str) -> CoreResult<&str> {
    if is_identifier(s) {
        Ok(s)
    } else {
        Err(QueryError::Validation(format!("无效的标识符: {}", s)))
    }
}

fn split_field(token: &str) -> Option<(&str, &str)> {
    let (field, value) = token.split_once(':')?;
    (is_identifier(field) && !value.is_empty()).then_some((field, value))
}

fn escape(s: &str) -> String {
    s.replace('\'', "''")
}

fn numeric() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("static regex"))
}

/// 纯十进制数字不加引号，其余一律按字符串字面量
fn literal(value: &str) -> String {
    if numeric().is_match(value) {
        value.to_string()
    } else {
        format!("'{}'", escape(value))
    }
}

fn parse_window(w: &str) -> CoreResult<(u64, &'static str)> {
    let invalid = || QueryError::Validation(format!("无效的时间窗口: {}", w));
    let split = w.len().checked_sub(1).ok_or_else(invalid)?;
    if !w.is_char_boundary(split) {
        return Err(invalid());
    }
    let (amount, unit) = w.split_at(split);
    let amount = amount.parse::<u64>().map_err(|_| invalid())?;
    let unit = match unit {
        "m" => "minutes",
        "h" => "hours",
        "d" => "days",
        _ => return Err(invalid()),
    };
    Ok((amount, unit))
}

//! 查询结构指纹与相似度
//!
//! 指纹只反映查询形状：字面量、限定列名被替换成占位符，参数只保留名字和类型。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::cache::key::sha256_hex;
use crate::core::types::ParamMap;

fn quoted_string() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"'(?:[^']|'')*'|"(?:[^"\\]|\\.)*""#).expect("static regex"))
}

fn qualified_column() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-z_][a-z0-9_]*\.[a-z_][a-z0-9_]*\b").expect("static regex"))
}

fn number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+(?:\.\d+)?\b").expect("static regex"))
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// 查询形状：小写、压缩空白、替换字面量与限定列名，截断到 `max_len` 个字符
pub fn query_shape(query: &str, max_len: usize) -> String {
    let lowered = query.to_lowercase();
    let collapsed = whitespace().replace_all(lowered.trim(), " ");
    let shaped = quoted_string().replace_all(&collapsed, "?s");
    let shaped = qualified_column().replace_all(&shaped, "?c");
    let shaped = number().replace_all(&shaped, "?n");
    shaped.chars().take(max_len).collect()
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 参数类型指纹：按名字排序的 `name:type` 列表
pub fn param_types(params: &ParamMap) -> String {
    let mut pairs: Vec<String> = params
        .iter()
        .map(|(name, value)| format!("{}:{}", name, value_type(value)))
        .collect();
    pairs.sort();
    pairs.join(",")
}

/// 结构指纹生成器
#[derive(Debug, Clone, Copy)]
pub struct Fingerprinter {
    shape_len: usize,
    prefix_len: usize,
}

impl Fingerprinter {
    pub fn new(shape_len: usize, prefix_len: usize) -> Self {
        Self {
            shape_len,
            prefix_len: prefix_len.max(1),
        }
    }

    pub fn fingerprint(&self, query: &str, params: &ParamMap) -> String {
        let shape = query_shape(query, self.shape_len);
        sha256_hex(format!("{}\0{}", shape, param_types(params)).as_bytes())
    }

    /// 候选分组使用的短前缀
    pub fn prefix<'a>(&self, fingerprint: &'a str) -> &'a str {
        let end = fingerprint
            .char_indices()
            .nth(self.prefix_len)
            .map(|(i, _)| i)
            .unwrap_or(fingerprint.len());
        &fingerprint[..end]
    }
}

/// 指纹相似度打分
pub trait SimilarityScorer: Send + Sync + std::fmt::Debug {
    /// 返回 `[0, 1]` 区间的分数
    fn score(&self, a: &str, b: &str) -> f64;
}

/// 逐位置字符匹配比例
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionalScorer;

impl SimilarityScorer for PositionalScorer {
    fn score(&self, a: &str, b: &str) -> f64 {
        let longest = a.chars().count().max(b.chars().count());
        if longest == 0 {
            return 1.0;
        }
        let matching = a.chars().zip(b.chars()).filter(|(x, y)| x == y).count();
        matching as f64 / longest as f64
    }
}

//! 缓存键
//!
//! 键是对（语言标签、原始查询文本、规范化参数）的 SHA-256：
//! 对参数插入顺序不敏感，对其他任何差异（包括空白）都敏感。

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::types::{ParamMap, QueryLanguage};

/// 递归地按键排序
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub fn canonical_params(params: &ParamMap) -> String {
    canonicalize(&Value::Object(params.clone())).to_string()
}

/// 计算缓存键（64 位十六进制摘要）
pub fn cache_key(language: QueryLanguage, query: &str, params: &ParamMap) -> String {
    let mut hasher = Sha256::new();
    hasher.update(language.tag().as_bytes());
    hasher.update([0u8]);
    hasher.update(query.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_params(params).as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// 存储中的键空间
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn entry(&self, key: &str) -> String {
        format!("{}:result:{}", self.prefix, key)
    }

    pub fn entries_prefix(&self) -> String {
        format!("{}:result:", self.prefix)
    }

    /// 从存储键中取回缓存键
    pub fn strip_entry<'a>(&self, stored: &'a str) -> Option<&'a str> {
        stored.strip_prefix(&self.entries_prefix())
    }

    pub fn tag(&self, tag: &str) -> String {
        format!("{}:tag:{}", self.prefix, tag)
    }

    pub fn fingerprint_bucket(&self, fingerprint_prefix: &str) -> String {
        format!("{}:fp:{}", self.prefix, fingerprint_prefix)
    }

    /// 所有指纹桶的名字集合
    pub fn bucket_registry(&self) -> String {
        format!("{}:fp-buckets", self.prefix)
    }

    pub fn tag_registry(&self) -> String {
        format!("{}:tags", self.prefix)
    }

    /// 失效通知频道
    pub fn invalidation_channel(&self) -> String {
        format!("{}:invalidations", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> ParamMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_param_order_does_not_matter() {
        let mut a = ParamMap::new();
        a.insert("a".into(), json!(1));
        a.insert("b".into(), json!(2));
        let mut b = ParamMap::new();
        b.insert("b".into(), json!(2));
        b.insert("a".into(), json!(1));

        assert_eq!(
            cache_key(QueryLanguage::Sql, "SELECT 1", &a),
            cache_key(QueryLanguage::Sql, "SELECT 1", &b)
        );
    }

    #[test]
    fn test_every_other_difference_matters() {
        let p = params(json!({"a": 1}));
        let base = cache_key(QueryLanguage::Sql, "SELECT 1", &p);
        assert_ne!(base, cache_key(QueryLanguage::Dsl, "SELECT 1", &p));
        assert_ne!(base, cache_key(QueryLanguage::Sql, "SELECT  1", &p));
        assert_ne!(base, cache_key(QueryLanguage::Sql, "SELECT 1", &params(json!({"a": "1"}))));
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn test_nested_canonicalization() {
        let v = json!({"z": {"b": 1, "a": [{"y": 1, "x": 2}]}});
        assert_eq!(canonicalize(&v).to_string(), r#"{"z":{"a":[{"x":2,"y":1}],"b":1}}"#);
    }

    #[test]
    fn test_key_space() {
        let ks = KeySpace::new("qc");
        assert_eq!(ks.entry("abc"), "qc:result:abc");
        assert_eq!(ks.strip_entry("qc:result:abc"), Some("abc"));
        assert_eq!(ks.tag("lang:sql"), "qc:tag:lang:sql");
        assert_eq!(ks.fingerprint_bucket("0a1b2c3d"), "qc:fp:0a1b2c3d");
    }
}

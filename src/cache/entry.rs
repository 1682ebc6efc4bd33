//! 缓存条目
//!
//! 存储格式：4 字节大端头部长度 + JSON 头部 + 载荷字节。
//! 载荷是结果的 JSON（未压缩）、zstd 压缩后的 JSON，或为空（引用记录）。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{CoreResult, QueryError};
use crate::core::types::QueryResult;

/// 条目元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub created_at: DateTime<Utc>,
    pub hit_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub tags: Vec<String>,
    pub ttl_ms: u64,
    /// 压缩后大小 / 原始大小；未压缩时为 1.0
    pub compression_ratio: f64,
    /// 序列化后的原始结果大小（字节）
    pub original_size: usize,
    pub fingerprint: Option<String>,
    pub execution_time_ms: u64,
}

impl EntryMetadata {
    pub fn new(tags: Vec<String>, ttl: Duration, execution_time_ms: u64) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            hit_count: 0,
            last_accessed: now,
            tags,
            ttl_ms: ttl.as_millis() as u64,
            compression_ratio: 1.0,
            original_size: 0,
            fingerprint: None,
            execution_time_ms,
        }
    }

    /// 剩余存活时间；已过期时为 `None`
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let expires_at = self.created_at + chrono::Duration::milliseconds(self.ttl_ms as i64);
        (expires_at - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
    }

    pub fn record_hit(&mut self) {
        self.hit_count += 1;
        self.last_accessed = Utc::now();
    }
}

/// 条目载荷
#[derive(Debug, Clone, PartialEq)]
pub enum CachePayload {
    /// 未压缩的结果 JSON
    Inline(Vec<u8>),
    /// zstd 压缩后的结果 JSON
    Compressed(Vec<u8>),
    /// 指向另一个缓存键的轻量引用
    Reference { key: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum PayloadHeader {
    Inline,
    Compressed,
    Reference { key: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    metadata: EntryMetadata,
    compressed: bool,
    content_hash: String,
    payload: PayloadHeader,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: CachePayload,
    pub metadata: EntryMetadata,
    pub compressed: bool,
    /// 序列化结果的 SHA-256
    pub content_hash: String,
}

impl CacheEntry {
    pub fn inline(bytes: Vec<u8>, content_hash: String, mut metadata: EntryMetadata) -> Self {
        metadata.original_size = bytes.len();
        metadata.compression_ratio = 1.0;
        Self {
            payload: CachePayload::Inline(bytes),
            metadata,
            compressed: false,
            content_hash,
        }
    }

    pub fn compressed(
        bytes: Vec<u8>,
        original_size: usize,
        content_hash: String,
        mut metadata: EntryMetadata,
    ) -> Self {
        metadata.original_size = original_size;
        metadata.compression_ratio = if original_size == 0 {
            1.0
        } else {
            bytes.len() as f64 / original_size as f64
        };
        Self {
            payload: CachePayload::Compressed(bytes),
            metadata,
            compressed: true,
            content_hash,
        }
    }

    pub fn reference(target_key: &str, target: &CacheEntry, metadata: EntryMetadata) -> Self {
        Self {
            payload: CachePayload::Reference {
                key: target_key.to_string(),
            },
            metadata,
            compressed: false,
            content_hash: target.content_hash.clone(),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.payload, CachePayload::Reference { .. })
    }

    /// 还原结果；引用记录需要调用方先解析
    pub fn decode_result(&self) -> CoreResult<QueryResult> {
        let json = match &self.payload {
            CachePayload::Inline(bytes) => std::borrow::Cow::Borrowed(bytes.as_slice()),
            CachePayload::Compressed(bytes) => std::borrow::Cow::Owned(
                zstd::stream::decode_all(bytes.as_slice())
                    .map_err(|e| QueryError::Cache(format!("解压缓存条目失败: {}", e)))?,
            ),
            CachePayload::Reference { key } => {
                return Err(QueryError::Cache(format!("引用记录未解析: {}", key)));
            }
        };
        serde_json::from_slice(&json)
            .map_err(|e| QueryError::Cache(format!("反序列化缓存条目失败: {}", e)))
    }

    /// 存储字节数
    pub fn payload_len(&self) -> usize {
        match &self.payload {
            CachePayload::Inline(bytes) | CachePayload::Compressed(bytes) => bytes.len(),
            CachePayload::Reference { .. } => 0,
        }
    }

    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let (payload, body): (PayloadHeader, &[u8]) = match &self.payload {
            CachePayload::Inline(bytes) => (PayloadHeader::Inline, bytes.as_slice()),
            CachePayload::Compressed(bytes) => (PayloadHeader::Compressed, bytes.as_slice()),
            CachePayload::Reference { key } => (PayloadHeader::Reference { key: key.clone() }, &[][..]),
        };
        let header = serde_json::to_vec(&EntryHeader {
            metadata: self.metadata.clone(),
            compressed: self.compressed,
            content_hash: self.content_hash.clone(),
            payload,
        })?;

        let header_len = u32::try_from(header.len())
            .map_err(|_| QueryError::Cache("缓存条目头部过大".to_string()))?;
        let mut out = Vec::with_capacity(4 + header.len() + body.len());
        out.extend_from_slice(&header_len.to_be_bytes());
        out.extend_from_slice(&header);
        out.extend_from_slice(body);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let corrupt = || QueryError::Cache("缓存条目已损坏".to_string());
        let len_bytes: [u8; 4] = bytes.get(..4).ok_or_else(corrupt)?.try_into().map_err(|_| corrupt())?;
        let header_len = u32::from_be_bytes(len_bytes) as usize;
        let header_end = 4usize.checked_add(header_len).ok_or_else(corrupt)?;
        let header_bytes = bytes.get(4..header_end).ok_or_else(corrupt)?;
        let body = &bytes[header_end..];

        let header: EntryHeader = serde_json::from_slice(header_bytes)
            .map_err(|e| QueryError::Cache(format!("缓存条目头部无法解析: {}", e)))?;
        let payload = match header.payload {
            PayloadHeader::Inline => CachePayload::Inline(body.to_vec()),
            PayloadHeader::Compressed => CachePayload::Compressed(body.to_vec()),
            PayloadHeader::Reference { key } => CachePayload::Reference { key },
        };
        Ok(Self {
            payload,
            metadata: header.metadata,
            compressed: header.compressed,
            content_hash: header.content_hash,
        })
    }
}

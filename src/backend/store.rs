//! 键值缓存存储接口

use std::time::Duration;

use async_trait::async_trait;

use crate::core::error::CoreResult;

/// 键值缓存存储
///
/// 语义对应 Redis 的 `GET` / `SET EX` / `SET KEEPTTL` / `DEL` / `SCAN MATCH` /
/// `SADD` / `SMEMBERS` / `SREM` / `PUBLISH`
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>>;

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CoreResult<()>;

    /// 覆盖值但保留原有过期时间；键不存在时返回 `false`
    async fn set_keep_ttl(&self, key: &str, value: Vec<u8>) -> CoreResult<bool>;

    async fn delete(&self, key: &str) -> CoreResult<bool>;

    async fn scan_prefix(&self, prefix: &str) -> CoreResult<Vec<String>>;

    async fn set_add(&self, set: &str, member: &str) -> CoreResult<()>;

    async fn set_members(&self, set: &str) -> CoreResult<Vec<String>>;

    async fn set_remove(&self, set: &str, member: &str) -> CoreResult<()>;

    /// 发布消息，返回收到消息的订阅者数量
    async fn publish(&self, channel: &str, message: &str) -> CoreResult<usize>;
}

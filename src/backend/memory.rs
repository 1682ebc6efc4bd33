//! 内存实现
//!
//! 所有协作方接口的进程内实现，供测试和命令行离线使用：
//! - `MemoryStore`：带 TTL、集合和发布订阅的键值存储
//! - `MemoryRelationalBackend`：由闭包驱动的关系型连接池，统计连接与并发
//! - `MemorySearchBackend`：按索引名保存文档的检索后端

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use tokio::sync::broadcast;

use super::explain::PlanNode;
use super::relational::{RelationalBackend, RelationalConnection, RowSet};
use super::search::{SearchBackend, SearchResponse};
use super::store::CacheStore;
use crate::core::error::{CoreResult, QueryError};
use crate::core::types::Row;

// ==================== 键值存储 ====================

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// 进程内键值存储
#[derive(Debug)]
pub struct MemoryStore {
    values: DashMap<String, StoredValue>,
    sets: DashMap<String, HashSet<String>>,
    channel: broadcast::Sender<(String, String)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (channel, _) = broadcast::channel(256);
        Self {
            values: DashMap::new(),
            sets: DashMap::new(),
            channel,
        }
    }

    /// 订阅所有频道的消息 `(channel, message)`
    pub fn subscribe(&self) -> broadcast::Receiver<(String, String)> {
        self.channel.subscribe()
    }

    /// 清理已过期的值，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let before = self.values.len();
        self.values.retain(|_, v| !v.is_expired());
        before - self.values.len()
    }

    /// 未过期的值数量
    pub fn live_len(&self) -> usize {
        self.values.iter().filter(|e| !e.value().is_expired()).count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        match self.values.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.bytes.clone())),
            Some(_) => {}
            None => return Ok(None),
        }
        // 惰性删除过期值，读锁已在上面释放
        self.values.remove_if(key, |_, v| v.is_expired());
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CoreResult<()> {
        self.values.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_keep_ttl(&self, key: &str, value: Vec<u8>) -> CoreResult<bool> {
        match self.values.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.bytes = value;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> CoreResult<bool> {
        Ok(self.values.remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> CoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .values
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().is_expired())
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn set_add(&self, set: &str, member: &str) -> CoreResult<()> {
        self.sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_members(&self, set: &str) -> CoreResult<Vec<String>> {
        let mut members: Vec<String> = self
            .sets
            .get(set)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn set_remove(&self, set: &str, member: &str) -> CoreResult<()> {
        let now_empty = match self.sets.get_mut(set) {
            Some(mut members) => {
                members.remove(member);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.sets.remove_if(set, |_, members| members.is_empty());
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> CoreResult<usize> {
        // 没有订阅者时 send 返回错误，按 0 个接收者处理
        Ok(self
            .channel
            .send((channel.to_string(), message.to_string()))
            .unwrap_or(0))
    }
}

// ==================== 关系型后端 ====================

type QueryHandler = dyn Fn(&str, &[Value]) -> CoreResult<RowSet> + Send + Sync;
type ExplainHandler = dyn Fn(&str) -> CoreResult<PlanNode> + Send + Sync;

#[derive(Debug, Default)]
struct ConnectionCounters {
    acquired: AtomicUsize,
    released: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

/// 内存关系型后端的连接与执行统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBackendStats {
    pub acquired: usize,
    pub released: usize,
    pub queries_executed: usize,
    pub max_in_flight: usize,
}

/// 由闭包驱动的关系型连接池
#[derive(Clone)]
pub struct MemoryRelationalBackend {
    handler: Arc<QueryHandler>,
    explain: Arc<ExplainHandler>,
    latency: Duration,
    counters: Arc<ConnectionCounters>,
}

impl MemoryRelationalBackend {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &[Value]) -> CoreResult<RowSet> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            explain: Arc::new(|_| Ok(PlanNode::new("Result", 0.01, 1.0))),
            latency: Duration::ZERO,
            counters: Arc::new(ConnectionCounters::default()),
        }
    }

    /// 对任何查询都返回同一组行
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self::new(move |_, _| Ok(RowSet::from_rows(rows.clone())))
    }

    pub fn with_explain<F>(mut self, explain: F) -> Self
    where
        F: Fn(&str) -> CoreResult<PlanNode> + Send + Sync + 'static,
    {
        self.explain = Arc::new(explain);
        self
    }

    /// 模拟每次查询的网络往返耗时
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn stats(&self) -> MemoryBackendStats {
        MemoryBackendStats {
            acquired: self.counters.acquired.load(Ordering::SeqCst),
            released: self.counters.released.load(Ordering::SeqCst),
            queries_executed: self.counters.executed.lock().len(),
            max_in_flight: self.counters.max_in_flight.load(Ordering::SeqCst),
        }
    }

    /// 按执行顺序记录的查询文本
    pub fn executed_queries(&self) -> Vec<String> {
        self.counters.executed.lock().clone()
    }
}

impl std::fmt::Debug for MemoryRelationalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRelationalBackend")
            .field("latency", &self.latency)
            .field("stats", &self.stats())
            .finish()
    }
}

struct MemoryConnection {
    handler: Arc<QueryHandler>,
    explain: Arc<ExplainHandler>,
    latency: Duration,
    counters: Arc<ConnectionCounters>,
    released: bool,
}

#[async_trait]
impl RelationalConnection for MemoryConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> CoreResult<RowSet> {
        let current = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.counters.executed.lock().push(sql.to_string());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = (self.handler)(sql, params);

        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn explain(&mut self, sql: &str) -> CoreResult<PlanNode> {
        (self.explain)(sql)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl RelationalBackend for MemoryRelationalBackend {
    async fn connect(&self) -> CoreResult<Box<dyn RelationalConnection>> {
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            handler: Arc::clone(&self.handler),
            explain: Arc::clone(&self.explain),
            latency: self.latency,
            counters: Arc::clone(&self.counters),
            released: false,
        }))
    }
}

// ==================== 检索后端 ====================

/// 按索引名保存文档的检索后端
#[derive(Debug, Default)]
pub struct MemorySearchBackend {
    indices: BTreeMap<String, Vec<Row>>,
    fail_indices: HashSet<String>,
    searches: Mutex<Vec<String>>,
}

impl MemorySearchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, name: impl Into<String>, docs: Vec<Row>) -> Self {
        self.indices.insert(name.into(), docs);
        self
    }

    /// 对指定具体索引的检索返回错误
    pub fn with_failing_index(mut self, name: impl Into<String>) -> Self {
        self.fail_indices.insert(name.into());
        self
    }

    /// 按执行顺序记录的检索目标
    pub fn searched_indices(&self) -> Vec<String> {
        self.searches.lock().clone()
    }

    fn matching(&self, pattern: &str) -> CoreResult<Vec<String>> {
        let mut names = Vec::new();
        for part in pattern.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let re = Regex::new(&format!("^{}$", regex::escape(part).replace(r"\*", ".*")))
                .map_err(|e| QueryError::Backend(format!("无效的索引模式 '{}': {}", part, e)))?;
            for name in self.indices.keys() {
                if re.is_match(name) && !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        Ok(names)
    }
}

/// 检索体中的 `{"query": {"term": {field: value}}}` 过滤
fn term_filter(body: &Value) -> Option<(&String, &Value)> {
    body.get("query")?
        .get("term")?
        .as_object()?
        .iter()
        .next()
}

#[async_trait]
impl SearchBackend for MemorySearchBackend {
    async fn search(&self, index: &str, body: &Value) -> CoreResult<SearchResponse> {
        let started = Instant::now();
        let names = self.matching(index)?;
        if names.is_empty() {
            return Err(QueryError::Backend(format!("索引不存在: {}", index)));
        }
        self.searches.lock().push(index.to_string());

        let filter = term_filter(body);
        let mut hits = Vec::new();
        for name in &names {
            if self.fail_indices.contains(name) {
                return Err(QueryError::Backend(format!("索引 {} 检索失败", name)));
            }
            let docs = self.indices.get(name).map(Vec::as_slice).unwrap_or_default();
            hits.extend(
                docs.iter()
                    .filter(|doc| match filter {
                        Some((field, value)) => doc.get(field) == Some(value),
                        None => true,
                    })
                    .cloned(),
            );
        }

        let total = hits.len() as u64;
        if let Some(size) = body.get("size").and_then(Value::as_u64) {
            hits.truncate(size as usize);
        }
        Ok(SearchResponse {
            hits,
            took_ms: started.elapsed().as_millis() as u64,
            total: Some(total),
        })
    }

    async fn resolve_indices(&self, pattern: &str) -> CoreResult<Vec<String>> {
        self.matching(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_store_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", b"v".to_vec(), Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.set_keep_ttl("k", b"w".to_vec()).await.unwrap());
        assert!(store.scan_prefix("k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_sets_and_publish() {
        let store = MemoryStore::new();
        store.set_add("tags", "a").await.unwrap();
        store.set_add("tags", "b").await.unwrap();
        store.set_add("tags", "a").await.unwrap();
        assert_eq!(store.set_members("tags").await.unwrap(), vec!["a", "b"]);

        store.set_remove("tags", "a").await.unwrap();
        store.set_remove("tags", "b").await.unwrap();
        assert!(store.set_members("tags").await.unwrap().is_empty());

        assert_eq!(store.publish("jobs", "done").await.unwrap(), 0);
        let mut rx = store.subscribe();
        assert_eq!(store.publish("jobs", "done").await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), ("jobs".to_string(), "done".to_string()));
    }

    #[tokio::test]
    async fn test_search_pattern_resolution() {
        let backend = MemorySearchBackend::new()
            .with_index("logs-2024.01.01", vec![doc(json!({"host": "a"}))])
            .with_index("logs-2024.01.02", vec![doc(json!({"host": "b"}))])
            .with_index("metrics", vec![]);

        let names = backend.resolve_indices("logs-*").await.unwrap();
        assert_eq!(names, vec!["logs-2024.01.01", "logs-2024.01.02"]);

        let response = backend
            .search("logs-*", &json!({"query": {"term": {"host": "b"}}}))
            .await
            .unwrap();
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.total, Some(1));
    }
}

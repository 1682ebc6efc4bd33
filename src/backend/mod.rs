//! 外部协作方接口
//!
//! 核心只消费这些接口，不拥有连接池、检索集群或键值存储本身：
//! - 关系型 / 时序型后端：池化连接 + 执行计划解释
//! - 检索索引后端：检索 + 索引模式解析
//! - 键值缓存存储：带 TTL 的读写、前缀扫描、集合成员与发布

pub mod explain;
pub mod memory;
pub mod relational;
pub mod search;
pub mod store;

pub use explain::PlanNode;
pub use memory::{MemoryRelationalBackend, MemorySearchBackend, MemoryStore};
pub use relational::{FieldDescriptor, PooledConnection, RelationalBackend, RelationalConnection, RowSet};
pub use search::{SearchBackend, SearchRequest, SearchResponse};
pub use store::CacheStore;

//! 查询结果缓存
//!
//! 以查询身份（语言、文本、规范化参数）为键保存已完成的结果。
//! 压缩变体额外做大结果压缩与基于结构指纹的近似重复检测；
//! `SingleFlight` 保证同一键同时最多只有一次执行。

pub mod cache_impl;
pub mod entry;
pub mod factory;
pub mod fingerprint;
pub mod key;
pub mod single_flight;
pub mod stats_collector;
pub mod traits;

pub use cache_impl::{CompressedResultCache, PlainResultCache};
pub use entry::{CacheEntry, CachePayload, EntryMetadata};
pub use factory::CacheFactory;
pub use fingerprint::{Fingerprinter, PositionalScorer, SimilarityScorer};
pub use key::{cache_key, KeySpace};
pub use single_flight::{FlightRole, SingleFlight};
pub use stats_collector::{CacheStats, CacheStatsCollector};
pub use traits::{CacheHit, HitSource, ResultCache, SetOptions, WarmUpQuery, WarmUpReport};

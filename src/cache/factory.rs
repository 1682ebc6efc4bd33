//! 缓存工厂
//!
//! 按配置中的变体创建结果缓存实例

use std::sync::Arc;

use super::cache_impl::{CompressedResultCache, PlainResultCache};
use super::traits::ResultCache;
use crate::backend::CacheStore;
use crate::config::{CacheConfig, CacheVariant};

pub struct CacheFactory;

impl CacheFactory {
    pub fn create(config: &CacheConfig, store: Arc<dyn CacheStore>) -> Arc<dyn ResultCache> {
        match config.variant {
            CacheVariant::Plain => Arc::new(PlainResultCache::new(store, config)),
            CacheVariant::Compressed => Arc::new(CompressedResultCache::new(store, config)),
        }
    }
}

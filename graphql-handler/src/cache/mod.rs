//! Caches shared by every request: parsed documents and persisted queries.
//!
//! The executor only relies on [`QueryCache::get`] and [`QueryCache::add`], eviction is up to
//! the implementation.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

pub use self::storage::LruQueryCache;

mod storage;

pub const DEFAULT_QUERY_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(1000).unwrap();
pub const DEFAULT_APQ_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(100).unwrap();

pub trait ValueType: Clone + fmt::Debug + Send + Sync + 'static {}

// Blanket implementation which satisfies the compiler
impl<V> ValueType for V where V: Clone + fmt::Debug + Send + Sync + 'static {}

/// A cache keyed by query text or persisted query hash.
///
/// Implementations are shared between concurrent requests.
#[async_trait]
pub trait QueryCache<V: ValueType>: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Option<V>;

    async fn add(&self, key: String, value: V);
}

#[async_trait]
impl<V: ValueType, C: QueryCache<V> + ?Sized> QueryCache<V> for Arc<C> {
    async fn get(&self, key: &str) -> Option<V> {
        (**self).get(key).await
    }

    async fn add(&self, key: String, value: V) {
        (**self).add(key, value).await
    }
}

/// An unbounded cache, entries are never evicted.
#[derive(Debug)]
pub struct MapCache<V> {
    entries: DashMap<String, V>,
}

impl<V> Default for MapCache<V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V> MapCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<V: ValueType> QueryCache<V> for MapCache<V> {
    async fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    async fn add(&self, key: String, value: V) {
        self.entries.insert(key, value);
    }
}

/// A cache that never stores anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCache;

#[async_trait]
impl<V: ValueType> QueryCache<V> for NoCache {
    async fn get(&self, _key: &str) -> Option<V> {
        None
    }

    async fn add(&self, _key: String, _value: V) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn map_cache_keeps_everything() {
        let cache = MapCache::new();
        for i in 0..2000 {
            cache.add(format!("key{i}"), i).await;
        }
        assert_eq!(cache.len(), 2000);
        assert_eq!(cache.get("key0").await, Some(0));
    }

    #[tokio::test]
    async fn no_cache_forgets() {
        let cache = NoCache;
        QueryCache::<String>::add(&cache, "key".into(), "value".into()).await;
        assert_eq!(QueryCache::<String>::get(&cache, "key").await, None);
    }
}

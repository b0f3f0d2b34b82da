use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;

use super::QueryCache;
use super::ValueType;

/// A capacity bounded cache evicting the least recently used entry.
#[derive(Clone)]
pub struct LruQueryCache<V: ValueType> {
    inner: Arc<Mutex<LruCache<String, V>>>,
}

impl<V> LruQueryCache<V>
where
    V: ValueType,
{
    pub fn new(max_capacity: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(max_capacity))),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[async_trait]
impl<V> QueryCache<V> for LruQueryCache<V>
where
    V: ValueType,
{
    async fn get(&self, key: &str) -> Option<V> {
        self.inner.lock().await.get(key).cloned()
    }

    async fn add(&self, key: String, value: V) {
        self.inner.lock().await.put(key, value);
    }
}

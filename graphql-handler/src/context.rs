//! The request scoped handle every stage of one request receives.
//!
//! A [`Context`] is created by the transport together with the raw parameters. Clones share
//! the same state, so an operation middleware can leave a value for a field middleware or a
//! resolver further down.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use parking_lot::MutexGuard;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tower::BoxError;

use crate::json_ext::Value;

#[derive(Clone, Debug, Default)]
pub struct Context {
    /// Serializable values, visible to anything holding the context.
    values: Arc<DashMap<String, Value>>,
    extensions: Extensions,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, BoxError> {
        let Some(value) = self.values.get(key) else {
            return Ok(None);
        };
        Ok(Some(serde_json_bytes::from_value(value.clone())?))
    }

    /// Stores `value` under `key` and hands back what was there before.
    pub fn insert<V>(&self, key: impl Into<String>, value: V) -> Result<Option<V>, BoxError>
    where
        V: Serialize + DeserializeOwned,
    {
        let value = serde_json_bytes::to_value(value)?;
        match self.values.insert(key.into(), value) {
            Some(previous) => Ok(Some(serde_json_bytes::from_value(previous)?)),
            None => Ok(None),
        }
    }

    /// Replaces the value under `key` with `update(current)`, starting from `default()`.
    ///
    /// The entry stays locked for the whole update.
    pub fn upsert<V>(
        &self,
        key: impl Into<String>,
        update: impl FnOnce(V) -> V,
        default: impl FnOnce() -> V,
    ) -> Result<(), BoxError>
    where
        V: Serialize + DeserializeOwned,
    {
        let mut entry = self.values.entry(key.into()).or_insert(Value::Null);
        let current = match entry.value() {
            Value::Null => default(),
            value => serde_json_bytes::from_value(value.clone())?,
        };
        *entry.value_mut() = serde_json_bytes::to_value(update(current))?;
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Typed values that need not be serializable, like timers.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }
}

/// A shared, lockable [`http::Extensions`].
#[derive(Clone, Debug, Default)]
pub struct Extensions(Arc<Mutex<http::Extensions>>);

impl Extensions {
    /// Runs `f` with the extensions locked.
    pub fn with_lock<T>(&self, f: impl FnOnce(MutexGuard<'_, http::Extensions>) -> T) -> T {
        f(self.0.lock())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Context;

    #[test]
    fn insert_returns_the_previous_value() {
        let context = Context::new();
        assert_eq!(context.insert("attempts", 1).unwrap(), None);
        assert_eq!(context.insert("attempts", 2).unwrap(), Some(1));
        assert_eq!(context.get::<i32>("attempts").unwrap(), Some(2));
        assert_eq!(context.get::<i32>("missing").unwrap(), None);
        assert!(context.contains_key("attempts"));
    }

    #[test]
    fn upsert_starts_from_the_default() {
        let context = Context::new();
        context.upsert("count", |count: u32| count + 1, || 10).unwrap();
        context.upsert("count", |count: u32| count + 1, || 10).unwrap();
        assert_eq!(context.get::<u32>("count").unwrap(), Some(12));
    }

    #[test]
    fn type_mismatches_are_errors() {
        let context = Context::new();
        context.insert("name", "value".to_string()).unwrap();
        assert!(context.get::<u32>("name").is_err());
        assert!(context.upsert("name", |count: u32| count + 1, || 0).is_err());
        assert_eq!(
            context.get::<String>("name").unwrap().as_deref(),
            Some("value")
        );
    }

    #[test]
    fn clones_share_state() {
        let context = Context::new();
        let clone = context.clone();
        clone.insert("shared", true).unwrap();
        clone.extensions().with_lock(|mut lock| lock.insert(7u8));
        assert_eq!(context.get::<bool>("shared").unwrap(), Some(true));
        assert_eq!(
            context.extensions().with_lock(|lock| lock.get::<u8>().copied()),
            Some(7)
        );
    }
}

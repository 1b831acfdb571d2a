//! Read-through caching of single records and list pages.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{BoxError, ResourceError};
use crate::query::{ListResults, QueryListParam};
use crate::types::{Record, RecordId};

/// Key/value store the cache manager writes through.
///
/// `delete` accepts either an exact key or a pattern ending in `*`, which
/// removes every key sharing the prefix.
#[async_trait]
pub trait CacheAdaptor: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, BoxError>;

    async fn put(&self, key: &str, value: Value, age_seconds: i64) -> Result<(), BoxError>;

    async fn delete(&self, key_or_pattern: &str) -> Result<(), BoxError>;
}

/// Always misses and discards writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

#[async_trait]
impl CacheAdaptor for NoCache {
    async fn get(&self, _key: &str) -> Result<Option<Value>, BoxError> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _value: Value, _age_seconds: i64) -> Result<(), BoxError> {
        Ok(())
    }

    async fn delete(&self, _key_or_pattern: &str) -> Result<(), BoxError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

/// Process-local cache with per-entry expiry.
///
/// An age of zero or less keeps the entry until it is deleted.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl CacheAdaptor for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, BoxError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at.map_or(true, |at| at > now) => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
            }
        }

        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn put(&self, key: &str, value: Value, age_seconds: i64) -> Result<(), BoxError> {
        let expires_at = u64::try_from(age_seconds)
            .ok()
            .filter(|age| *age > 0)
            .map(|age| Instant::now() + Duration::from_secs(age));
        self.entries
            .write()
            .await
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key_or_pattern: &str) -> Result<(), BoxError> {
        let mut entries = self.entries.write().await;
        match key_or_pattern.strip_suffix('*') {
            Some(prefix) => entries.retain(|key, _| !key.starts_with(prefix)),
            None => {
                entries.remove(key_or_pattern);
            }
        }
        Ok(())
    }
}

/// Serialize `value` with object keys sorted at every depth, so equal
/// queries always produce the same cache key.
pub fn consistent_stringify_deep(value: &Value) -> String {
    let mut out = String::new();
    write_sorted(value, &mut out);
    out
}

fn write_sorted(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_sorted(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_sorted(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Cache policy for one resource.
///
/// A negative age disables caching for that tier; both tiers start
/// disabled.
#[derive(Clone)]
pub struct CacheManager {
    cache: Arc<dyn CacheAdaptor>,
    item_age_seconds: i64,
    list_age_seconds: i64,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(Arc::new(NoCache))
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("item_age_seconds", &self.item_age_seconds)
            .field("list_age_seconds", &self.list_age_seconds)
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    pub fn new(cache: Arc<dyn CacheAdaptor>) -> Self {
        Self {
            cache,
            item_age_seconds: -1,
            list_age_seconds: -1,
        }
    }

    pub fn with_ages(mut self, item_age_seconds: i64, list_age_seconds: i64) -> Self {
        self.item_age_seconds = item_age_seconds;
        self.list_age_seconds = list_age_seconds;
        self
    }

    pub fn item_age_seconds(&self) -> i64 {
        self.item_age_seconds
    }

    pub fn list_age_seconds(&self) -> i64 {
        self.list_age_seconds
    }

    pub fn set_item_age_seconds(&mut self, age: i64) {
        self.item_age_seconds = age;
    }

    pub fn set_list_age_seconds(&mut self, age: i64) {
        self.list_age_seconds = age;
    }

    /// Return the cached value under `key`, or compute it with `load` and
    /// store it for `age_seconds`.
    ///
    /// Inside a tokio runtime the store runs as a detached task, so a slow
    /// cache never delays the caller. A failed write is logged and the
    /// computed value is still returned.
    ///
    /// # Errors
    ///
    /// Propagates cache read failures and whatever `load` returns.
    pub async fn fetch<T, F, Fut>(
        &self,
        key: &str,
        age_seconds: i64,
        load: F,
    ) -> Result<Option<T>, ResourceError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, ResourceError>>,
    {
        match self.cache.get(key).await.map_err(ResourceError::cache)? {
            Some(Value::Null) | None => {}
            Some(cached) => match serde_json::from_value(cached) {
                Ok(value) => {
                    debug!(key, "cache hit");
                    return Ok(Some(value));
                }
                Err(e) => warn!(key, error = %e, "discarding undecodable cache entry"),
            },
        }

        debug!(key, "cache miss");
        let fresh = load().await?;
        if let Some(value) = &fresh {
            match serde_json::to_value(value) {
                Ok(encoded) => self.fill(key.to_string(), encoded, age_seconds).await,
                Err(e) => warn!(key, error = %e, "cannot encode value for cache"),
            }
        }
        Ok(fresh)
    }

    async fn fill(&self, key: String, value: Value, age_seconds: i64) {
        let cache = Arc::clone(&self.cache);
        let put = async move {
            if let Err(e) = cache.put(&key, value, age_seconds).await {
                warn!(key = %key, error = %e, "cache put failed");
            }
        };
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(put);
            }
            Err(_) => put.await,
        }
    }

    /// Cached single-record read, keyed `{resource}:get:{id}`.
    ///
    /// # Errors
    ///
    /// See [`CacheManager::fetch`].
    pub async fn get<F, Fut>(
        &self,
        resource: &str,
        id: &RecordId,
        load: F,
    ) -> Result<Option<Record>, ResourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Record>, ResourceError>>,
    {
        if self.item_age_seconds < 0 {
            return load().await;
        }
        let key = item_key(resource, id);
        self.fetch(&key, self.item_age_seconds, load).await
    }

    /// Cached list read, keyed `{resource}:list:{canonical query}`.
    ///
    /// # Errors
    ///
    /// See [`CacheManager::fetch`].
    pub async fn list<F, Fut>(
        &self,
        resource: &str,
        query: &QueryListParam,
        load: F,
    ) -> Result<Option<ListResults>, ResourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<ListResults>, ResourceError>>,
    {
        if self.list_age_seconds < 0 {
            return load().await;
        }
        let encoded = serde_json::to_value(query).map_err(ResourceError::cache)?;
        let key = format!("{}:list:{}", resource, consistent_stringify_deep(&encoded));
        self.fetch(&key, self.list_age_seconds, load).await
    }

    /// Drop the cached record for `id` (when given) and every cached list
    /// page of the resource.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Cache` if the cache refuses the delete.
    pub async fn invalidate(
        &self,
        resource: &str,
        id: Option<&RecordId>,
    ) -> Result<(), ResourceError> {
        if let Some(id) = id {
            self.cache
                .delete(&item_key(resource, id))
                .await
                .map_err(ResourceError::cache)?;
        }
        self.cache
            .delete(&format!("{}:list:*", resource))
            .await
            .map_err(ResourceError::cache)
    }
}

fn item_key(resource: &str, id: &RecordId) -> String {
    format!("{}:get:{}", resource, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Let detached cache fills run.
    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[derive(Default)]
    struct RecordingCache {
        deleted: Mutex<Vec<String>>,
        puts: AtomicUsize,
        fail_puts: bool,
        stall_puts: bool,
    }

    #[async_trait]
    impl CacheAdaptor for RecordingCache {
        async fn get(&self, _key: &str) -> Result<Option<Value>, BoxError> {
            Ok(None)
        }

        async fn put(&self, _key: &str, _value: Value, _age: i64) -> Result<(), BoxError> {
            if self.stall_puts {
                futures::future::pending::<()>().await;
            }
            self.puts.fetch_add(1, Ordering::SeqCst);
            if self.fail_puts {
                Err("cache down".into())
            } else {
                Ok(())
            }
        }

        async fn delete(&self, key: &str) -> Result<(), BoxError> {
            self.deleted.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    #[test]
    fn stringify_ignores_key_order() {
        let a = json!({ "a": 1, "b": { "x": [1, { "q": 2, "p": 1 }], "y": null } });
        let b = json!({ "b": { "y": null, "x": [1, { "p": 1, "q": 2 }] }, "a": 1 });
        assert_eq!(consistent_stringify_deep(&a), consistent_stringify_deep(&b));
        let unordered = json!({ "b": 2, "a": 1 });
        assert_eq!(consistent_stringify_deep(&unordered), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn stringify_keeps_array_order() {
        assert_ne!(
            consistent_stringify_deep(&json!([1, 2])),
            consistent_stringify_deep(&json!([2, 1]))
        );
    }

    #[tokio::test]
    async fn invalidate_with_id_deletes_item_and_lists() {
        let cache = Arc::new(RecordingCache::default());
        let manager = CacheManager::new(cache.clone());
        manager
            .invalidate("products", Some(&RecordId::Int(7)))
            .await
            .unwrap();
        assert_eq!(
            *cache.deleted.lock().unwrap(),
            vec!["products:get:7".to_string(), "products:list:*".to_string()]
        );
    }

    #[tokio::test]
    async fn invalidate_without_id_deletes_only_lists() {
        let cache = Arc::new(RecordingCache::default());
        let manager = CacheManager::new(cache.clone());
        manager.invalidate("products", None).await.unwrap();
        let deleted = cache.deleted.lock().unwrap().clone();
        assert_eq!(deleted, vec!["products:list:*".to_string()]);
    }

    #[tokio::test]
    async fn negative_age_bypasses_cache() {
        let cache = Arc::new(MemoryCache::new());
        let manager = CacheManager::new(cache.clone());
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            manager
                .get("products", &RecordId::Int(1), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(json!({ "id": 1 })))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn item_reads_are_cached() {
        let cache = Arc::new(MemoryCache::new());
        let manager = CacheManager::new(cache.clone()).with_ages(60, -1);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let row = manager
                .get("products", &RecordId::Int(1), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(json!({ "id": 1 })))
                })
                .await
                .unwrap();
            assert_eq!(row, Some(json!({ "id": 1 })));
            settle().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.keys().await, vec!["products:get:1".to_string()]);
    }

    #[tokio::test]
    async fn missing_rows_are_not_cached() {
        let cache = Arc::new(MemoryCache::new());
        let manager = CacheManager::new(cache.clone()).with_ages(60, 60);
        let row = manager
            .get("products", &RecordId::Int(9), || async { Ok(None) })
            .await
            .unwrap();
        assert!(row.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn list_pages_share_key_for_equal_queries() {
        let cache = Arc::new(MemoryCache::new());
        let manager = CacheManager::new(cache.clone()).with_ages(-1, 60);
        let query = QueryListParam::new("products");

        let first = manager
            .list("products", &query, || async {
                Ok(Some(ListResults {
                    data: vec![json!({ "id": 1 })],
                    total: 1,
                }))
            })
            .await
            .unwrap();
        settle().await;
        let second = manager
            .list("products", &query.clone(), || async {
                Ok(Some(ListResults::default()))
            })
            .await
            .unwrap();
        assert_eq!(first, second);

        manager.invalidate("products", None).await.unwrap();
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn failed_put_still_returns_value() {
        let cache = Arc::new(RecordingCache {
            fail_puts: true,
            ..Default::default()
        });
        let manager = CacheManager::new(cache.clone()).with_ages(60, 60);
        let row = manager
            .get("products", &RecordId::Int(1), || async {
                Ok(Some(json!({ "id": 1 })))
            })
            .await
            .unwrap();
        assert_eq!(row, Some(json!({ "id": 1 })));

        settle().await;
        assert_eq!(cache.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_fill_does_not_block_the_read() {
        let cache = Arc::new(RecordingCache {
            stall_puts: true,
            ..Default::default()
        });
        let manager = CacheManager::new(cache.clone()).with_ages(60, 60);

        let read = manager.get("products", &RecordId::Int(1), || async {
            Ok(Some(json!({ "id": 1 })))
        });
        let row = tokio::time::timeout(Duration::from_secs(1), read)
            .await
            .expect("read waited on the cache fill")
            .unwrap();
        assert_eq!(row, Some(json!({ "id": 1 })));
        assert_eq!(cache.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn memory_cache_expires_and_deletes_by_prefix() {
        let cache = MemoryCache::new();
        cache.put("a:get:1", json!(1), 0).await.unwrap();
        cache.put("a:list:x", json!(2), 0).await.unwrap();
        cache.put("a:list:y", json!(3), 0).await.unwrap();
        cache.put("b:list:x", json!(4), 0).await.unwrap();

        cache.delete("a:list:*").await.unwrap();
        assert_eq!(
            cache.keys().await,
            vec!["a:get:1".to_string(), "b:list:x".to_string()]
        );

        cache.delete("a:get:1").await.unwrap();
        assert_eq!(cache.get("a:get:1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn memory_cache_honours_age() {
        let cache = MemoryCache::new();
        cache.put("k", json!("v"), 5).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!("v")));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }
}

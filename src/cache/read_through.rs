use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::backend::CacheBackend;
use super::keys::{CacheKey, Invalidation};
use crate::config::CatalogConfig;
use crate::error::{CatalogError, CatalogResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Backend failures and timeouts, each of which was served as a miss
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

/// Read-through wrapper around a `CacheBackend`
///
/// A cache failure never fails a read: errors, timeouts and undecodable
/// payloads all count as a miss and fall through to the fetch.
///
/// Every invalidation advances a shared epoch. A value fetched under an
/// older epoch is never written back, so a slow fetch that read the store
/// before a write cannot repopulate the entry that write just removed.
///
/// The epoch lives with the `ReadThrough`, not the backend. Clones share it;
/// two wrappers built separately over one backend do not, so give a backend
/// a single `ReadThrough` and clone that.
#[derive(Clone)]
pub struct ReadThrough {
    backend: Arc<dyn CacheBackend>,
    config: Arc<CatalogConfig>,
    counters: Arc<Counters>,
    epoch: Arc<AtomicU64>,
}

impl ReadThrough {
    pub fn new(backend: Arc<dyn CacheBackend>, config: Arc<CatalogConfig>) -> Self {
        Self {
            backend,
            config,
            counters: Arc::new(Counters::default()),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Serve `key` from the cache, or run `fetch` and populate the cache with
    /// its result. Errors from `fetch` are returned and never cached.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &CacheKey, fetch: F) -> CatalogResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CatalogResult<T>>,
    {
        let epoch = self.epoch.load(Ordering::SeqCst);
        if let Some(value) = self.lookup(key).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Cache hit for {}", key);
            return Ok(value);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let value = fetch().await?;
        self.populate(key, &value, epoch).await;
        Ok(value)
    }

    /// Like `get_or_fetch`, but a `None` result is passed through uncached
    pub async fn get_or_fetch_optional<T, F, Fut>(
        &self,
        key: &CacheKey,
        fetch: F,
    ) -> CatalogResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CatalogResult<Option<T>>>,
    {
        let epoch = self.epoch.load(Ordering::SeqCst);
        if let Some(value) = self.lookup(key).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Cache hit for {}", key);
            return Ok(Some(value));
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let value = fetch().await?;
        if let Some(value) = &value {
            self.populate(key, value, epoch).await;
        }
        Ok(value)
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let timeout = self.config.cache_timeout();
        let payload = match tokio::time::timeout(timeout, self.backend.get(key.as_str())).await {
            Ok(Ok(payload)) => payload?,
            Ok(Err(e)) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Cache read for {} failed, treating as miss: {}", key, e);
                return None;
            }
            Err(_) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Cache read for {} timed out after {:?}", key, timeout);
                return None;
            }
        };

        match serde_json::from_slice(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Dropping undecodable cache entry {}: {}", key, e);
                if let Err(e) = self.backend.delete(key.as_str()).await {
                    tracing::warn!("Failed to drop cache entry {}: {}", key, e);
                }
                None
            }
        }
    }

    async fn populate<T: Serialize>(&self, key: &CacheKey, value: &T, epoch: u64) {
        let payload = match serde_json::to_vec(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Not caching {}: {}", key, e);
                return;
            }
        };
        let ttl = self.config.ttl_for(key.class());
        let timeout = self.config.cache_timeout();
        let backend = self.backend.clone();
        let current = self.epoch.clone();
        let key = key.to_string();

        let write = async move {
            if current.load(Ordering::SeqCst) != epoch {
                tracing::debug!("Skipping cache write for {}: invalidated during fetch", key);
                return;
            }
            match tokio::time::timeout(timeout, backend.set(&key, payload, ttl)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Cache write for {} failed: {}", key, e),
                Err(_) => tracing::warn!("Cache write for {} timed out after {:?}", key, timeout),
            }
            // an invalidation that landed during the write may have deleted before it
            if current.load(Ordering::SeqCst) != epoch {
                log_failure(
                    "delete",
                    &key,
                    tokio::time::timeout(timeout, backend.delete(&key)).await,
                    timeout,
                );
            }
        };

        if self.config.background_populate {
            tokio::spawn(write);
        } else {
            write.await;
        }
    }

    /// Remove everything `invalidation` names. Failures are logged, not returned.
    pub async fn invalidate(&self, invalidation: &Invalidation) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let timeout = self.config.cache_timeout();
        for key in &invalidation.keys {
            log_failure(
                "delete",
                key,
                tokio::time::timeout(timeout, self.backend.delete(key)).await,
                timeout,
            );
        }
        for pattern in &invalidation.patterns {
            let outcome = tokio::time::timeout(timeout, self.backend.delete_by_pattern(pattern)).await;
            if let Ok(Ok(removed)) = &outcome {
                tracing::debug!("Invalidated {} cache entries matching {}", removed, pattern);
            }
            log_failure("pattern delete", pattern, outcome, timeout);
        }
    }
}

fn log_failure<T>(
    op: &str,
    target: &str,
    outcome: Result<CatalogResult<T>, tokio::time::error::Elapsed>,
    timeout: Duration,
) {
    let err = match outcome {
        Ok(Ok(_)) => return,
        Ok(Err(e)) => e,
        Err(_) => CatalogError::Timeout {
            dependency: "cache",
            after: timeout,
        },
    };
    tracing::warn!("Cache {} for {} failed: {}", op, target, err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use async_trait::async_trait;

    use tokio::sync::Notify;

    use crate::cache::backend::MokaBackend;

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> CatalogResult<Option<Vec<u8>>> {
            Err(CatalogError::Cache("connection refused".into()))
        }
        async fn set(&self, _key: &str, _payload: Vec<u8>, _ttl: Duration) -> CatalogResult<()> {
            Err(CatalogError::Cache("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> CatalogResult<()> {
            Err(CatalogError::Cache("connection refused".into()))
        }
        async fn delete_by_pattern(&self, _pattern: &str) -> CatalogResult<u64> {
            Err(CatalogError::Cache("connection refused".into()))
        }
    }

    struct SlowBackend;

    #[async_trait]
    impl CacheBackend for SlowBackend {
        async fn get(&self, _key: &str) -> CatalogResult<Option<Vec<u8>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
        async fn set(&self, _key: &str, _payload: Vec<u8>, _ttl: Duration) -> CatalogResult<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
        async fn delete(&self, _key: &str) -> CatalogResult<()> {
            Ok(())
        }
        async fn delete_by_pattern(&self, _pattern: &str) -> CatalogResult<u64> {
            Ok(0)
        }
    }

    fn inline_config() -> Arc<CatalogConfig> {
        Arc::new(
            CatalogConfig::default()
                .with_background_populate(false)
                .with_cache_timeout(Duration::from_millis(50)),
        )
    }

    fn key() -> CacheKey {
        CacheKey::physical(crate::model::PlantId::new(1).unwrap())
    }

    #[tokio::test]
    async fn test_second_read_is_a_hit() {
        let cache = ReadThrough::new(Arc::new(MokaBackend::new(100)), inline_config());
        let first: Vec<String> = cache
            .get_or_fetch(&key(), || async { Ok(vec!["a".to_string()]) })
            .await
            .unwrap();
        let second: Vec<String> = cache
            .get_or_fetch(&key(), || async {
                Err(CatalogError::Store("store should not be called".into()))
            })
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_failing_backend_is_masked() {
        let cache = ReadThrough::new(Arc::new(BrokenBackend), inline_config());
        let value: u32 = cache.get_or_fetch(&key(), || async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(cache.stats().errors, 1);

        cache
            .invalidate(&Invalidation::companion_deleted())
            .await;
    }

    #[tokio::test]
    async fn test_slow_backend_times_out_to_fetch() {
        let cache = ReadThrough::new(Arc::new(SlowBackend), inline_config());
        let started = std::time::Instant::now();
        let value: u32 = cache.get_or_fetch(&key(), || async { Ok(3) }).await.unwrap();
        assert_eq!(value, 3);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_fetch_errors_are_not_cached() {
        let cache = ReadThrough::new(Arc::new(MokaBackend::new(100)), inline_config());
        let err = cache
            .get_or_fetch::<u32, _, _>(&key(), || async { Err(CatalogError::not_found("plant", 1)) })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        let value: u32 = cache.get_or_fetch(&key(), || async { Ok(1) }).await.unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn test_optional_none_is_not_cached() {
        let cache = ReadThrough::new(Arc::new(MokaBackend::new(100)), inline_config());
        let none: Option<u32> = cache
            .get_or_fetch_optional(&key(), || async { Ok(None) })
            .await
            .unwrap();
        assert!(none.is_none());
        let some: Option<u32> = cache
            .get_or_fetch_optional(&key(), || async { Ok(Some(4)) })
            .await
            .unwrap();
        assert_eq!(some, Some(4));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let backend = Arc::new(MokaBackend::new(100));
        backend
            .set(key().as_str(), b"not json".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let cache = ReadThrough::new(backend.clone(), inline_config());
        let value: u32 = cache.get_or_fetch(&key(), || async { Ok(9) }).await.unwrap();
        assert_eq!(value, 9);
        assert_eq!(backend.get(key().as_str()).await.unwrap(), Some(b"9".to_vec()));
    }

    async fn invalidation_during_fetch(config: Arc<CatalogConfig>) {
        let cache = ReadThrough::new(Arc::new(MokaBackend::new(100)), config);
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let reader = {
            let cache = cache.clone();
            let (entered, release) = (entered.clone(), release.clone());
            tokio::spawn(async move {
                cache
                    .get_or_fetch::<u32, _, _>(&key(), move || async move {
                        entered.notify_one();
                        release.notified().await;
                        Ok(1)
                    })
                    .await
            })
        };

        entered.notified().await;
        cache
            .invalidate(&Invalidation::physical_changed(crate::model::PlantId::new(1).unwrap()))
            .await;
        release.notify_one();
        assert_eq!(reader.await.unwrap().unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // the value read before the write must not come back from the cache
        let fresh: u32 = cache.get_or_fetch(&key(), || async { Ok(2) }).await.unwrap();
        assert_eq!(fresh, 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let cached: u32 = cache
            .get_or_fetch(&key(), || async {
                Err(CatalogError::Store("store should not be called".into()))
            })
            .await
            .unwrap();
        assert_eq!(cached, 2);
    }

    #[tokio::test]
    async fn test_stale_fetch_not_cached_inline() {
        invalidation_during_fetch(inline_config()).await;
    }

    #[tokio::test]
    async fn test_stale_fetch_not_cached_in_background() {
        let config = CatalogConfig::default()
            .with_background_populate(true)
            .with_cache_timeout(Duration::from_millis(50));
        invalidation_during_fetch(Arc::new(config)).await;
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            errors: 0,
        };
        assert_relative_eq!(stats.hit_rate(), 0.75);
        assert_relative_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}

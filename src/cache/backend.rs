use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;

use crate::error::CatalogResult;

/// Key/value cache with per-entry TTL and glob-pattern deletes
///
/// Payloads are opaque bytes; serialization belongs to the caller. A backend
/// may fail on any call, and callers are expected to treat failure as a miss.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CatalogResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> CatalogResult<()>;

    async fn delete(&self, key: &str) -> CatalogResult<()>;

    /// Delete every key matching `pattern`, where `*` matches any run of
    /// characters. Returns how many entries were removed.
    async fn delete_by_pattern(&self, pattern: &str) -> CatalogResult<u64>;
}

// ============================================================================
// In-process backend (moka)
// ============================================================================

#[derive(Clone)]
struct CacheEntry {
    payload: Arc<[u8]>,
    ttl: Duration,
}

/// Each entry lives for the TTL it was stored with; overwriting resets it
struct EntryTtl;

impl Expiry<String, CacheEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Clone)]
pub struct MokaBackend {
    cache: Cache<String, CacheEntry>,
}

impl MokaBackend {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryTtl)
            .build();
        Self { cache }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Apply pending evictions and expirations
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl CacheBackend for MokaBackend {
    async fn get(&self, key: &str) -> CatalogResult<Option<Vec<u8>>> {
        Ok(self.cache.get(key).await.map(|entry| entry.payload.to_vec()))
    }

    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> CatalogResult<()> {
        let entry = CacheEntry {
            payload: Arc::from(payload),
            ttl,
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CatalogResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> CatalogResult<u64> {
        let matching: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, _)| key)
            .collect();
        for key in &matching {
            self.cache.invalidate(key.as_str()).await;
        }
        Ok(matching.len() as u64)
    }
}

/// Backend that stores nothing; every read is a miss
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackend;

#[async_trait]
impl CacheBackend for NoopBackend {
    async fn get(&self, _key: &str) -> CatalogResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _payload: Vec<u8>, _ttl: Duration) -> CatalogResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> CatalogResult<()> {
        Ok(())
    }

    async fn delete_by_pattern(&self, _pattern: &str) -> CatalogResult<u64> {
        Ok(0)
    }
}

/// Glob match where `*` is the only wildcard
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0, 0);
    // Position of the last `*` seen and the text index it was tried against
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == b'*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("plant:12:*", "plant:12:en-GB"));
        assert!(!glob_match("plant:12:*", "plant:123:en"));
        assert!(glob_match("search:*", "search:abcdef"));
        assert!(!glob_match("search:*", "count:abcdef"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
        assert!(glob_match("physical:7", "physical:7"));
        assert!(!glob_match("physical:7", "physical:70"));
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = MokaBackend::new(100);
        backend
            .set("plant:1:en", b"rose".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            backend.get("plant:1:en").await.unwrap(),
            Some(b"rose".to_vec())
        );
        backend.delete("plant:1:en").await.unwrap();
        assert_eq!(backend.get("plant:1:en").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_by_pattern_only_touches_matches() {
        let backend = MokaBackend::new(100);
        let ttl = Duration::from_secs(60);
        for key in ["plant:1:en", "plant:1:fr", "plant:10:en", "search:aa"] {
            backend.set(key, vec![1], ttl).await.unwrap();
        }
        let removed = backend.delete_by_pattern("plant:1:*").await.unwrap();
        assert_eq!(removed, 2);
        assert!(backend.get("plant:1:en").await.unwrap().is_none());
        assert!(backend.get("plant:10:en").await.unwrap().is_some());
        assert!(backend.get("search:aa").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_entries_expire_after_their_ttl() {
        let backend = MokaBackend::new(100);
        backend
            .set("search:short", vec![1], Duration::from_millis(20))
            .await
            .unwrap();
        backend
            .set("plant:1:en", vec![2], Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(backend.get("search:short").await.unwrap().is_none());
        assert!(backend.get("plant:1:en").await.unwrap().is_some());
    }
}

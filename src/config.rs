//! Engine configuration
//!
//! Defaults suit a single-process deployment. `CatalogConfig::from_env` overlays
//! `CATALOG_*` environment variables on top of them:
//!
//! | variable | field |
//! |---|---|
//! | `CATALOG_DEFAULT_LANGUAGE` | `default_language` |
//! | `CATALOG_CACHE_CAPACITY` | `cache_capacity` |
//! | `CATALOG_SEARCH_TTL_SECS` | `ttl.search_secs` |
//! | `CATALOG_REFERENCE_TTL_SECS` | `ttl.growing_conditions_secs`, `ttl.physical_secs` |
//! | `CATALOG_STORE_TIMEOUT_MS` | `store_timeout_ms` |
//! | `CATALOG_CACHE_TIMEOUT_MS` | `cache_timeout_ms` |
//! | `CATALOG_BACKGROUND_POPULATE` | `background_populate` |

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheClass;

/// Per operation-class time-to-live, in seconds
///
/// Reference data that rarely changes lives longest; search results live
/// shortest because every write can change them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    pub plant_secs: u64,
    pub plant_batch_secs: u64,
    pub names_secs: u64,
    pub search_secs: u64,
    pub growing_conditions_secs: u64,
    pub physical_secs: u64,
    pub companions_secs: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            plant_secs: 15 * 60,
            plant_batch_secs: 15 * 60,
            names_secs: 30 * 60,
            search_secs: 2 * 60,
            growing_conditions_secs: 60 * 60,
            physical_secs: 60 * 60,
            companions_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Language used for the tier-3 name fallback
    pub default_language: String,
    /// Maximum number of cache entries
    pub cache_capacity: u64,
    pub ttl: CacheTtls,
    /// Upper bound on any single store call
    pub store_timeout_ms: u64,
    /// Upper bound on any single cache call; slower calls count as a miss
    pub cache_timeout_ms: u64,
    /// Populate the cache on a spawned task instead of inline
    pub background_populate: bool,
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// How long the language/family/genus snapshot stays fresh
    pub lookup_ttl_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            default_language: "en".to_string(),
            cache_capacity: 10_000,
            ttl: CacheTtls::default(),
            store_timeout_ms: 5_000,
            cache_timeout_ms: 250,
            background_populate: true,
            default_page_size: 20,
            max_page_size: 100,
            lookup_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl CatalogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by any `CATALOG_*` variables present in the environment
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(lang) = std::env::var("CATALOG_DEFAULT_LANGUAGE") {
            let lang = lang.trim().to_lowercase();
            if !lang.is_empty() {
                config.default_language = lang;
            }
        }
        if let Some(capacity) = env_parse("CATALOG_CACHE_CAPACITY") {
            config.cache_capacity = capacity;
        }
        if let Some(secs) = env_parse("CATALOG_SEARCH_TTL_SECS") {
            config.ttl.search_secs = secs;
        }
        if let Some(secs) = env_parse::<u64>("CATALOG_REFERENCE_TTL_SECS") {
            config.ttl.growing_conditions_secs = secs;
            config.ttl.physical_secs = secs;
        }
        if let Some(ms) = env_parse("CATALOG_STORE_TIMEOUT_MS") {
            config.store_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("CATALOG_CACHE_TIMEOUT_MS") {
            config.cache_timeout_ms = ms;
        }
        if let Some(background) = env_parse("CATALOG_BACKGROUND_POPULATE") {
            config.background_populate = background;
        }

        config
    }

    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into().trim().to_lowercase();
        self
    }

    pub fn with_cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_ttls(mut self, ttl: CacheTtls) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_background_populate(mut self, enabled: bool) -> Self {
        self.background_populate = enabled;
        self
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn lookup_ttl(&self) -> Duration {
        Duration::from_secs(self.lookup_ttl_secs)
    }

    pub fn ttl_for(&self, class: CacheClass) -> Duration {
        let secs = match class {
            CacheClass::Plant => self.ttl.plant_secs,
            CacheClass::PlantBatch => self.ttl.plant_batch_secs,
            CacheClass::Names => self.ttl.names_secs,
            CacheClass::Search | CacheClass::Count | CacheClass::ConditionSearch => {
                self.ttl.search_secs
            }
            CacheClass::GrowingConditions => self.ttl.growing_conditions_secs,
            CacheClass::Physical => self.ttl.physical_secs,
            CacheClass::Companions => self.ttl.companions_secs,
        };
        Duration::from_secs(secs)
    }

    /// Clamp a requested page size into `1..=max_page_size`; a zero maximum counts as 1
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}

//! Reference-data snapshot
//!
//! Languages and the family/genus taxonomy change rarely but are consulted on
//! every write. They are held as an immutable snapshot with a load time; the
//! owning `LookupCache` swaps in a fresh one once the TTL has passed or after
//! a write has marked it stale.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::error::{CatalogError, CatalogResult};
use crate::store::{bounded, CatalogStore};

#[derive(Debug, Clone)]
pub struct LookupSnapshot {
    /// language code -> display name
    languages: BTreeMap<String, String>,
    families: BTreeSet<String>,
    /// lowercased genus -> family
    genera: BTreeMap<String, String>,
    loaded_at: Instant,
    ttl: Duration,
    stale: bool,
}

impl LookupSnapshot {
    /// A snapshot that is already stale, forcing a load on first use
    pub fn empty(ttl: Duration) -> Self {
        Self {
            languages: BTreeMap::new(),
            families: BTreeSet::new(),
            genera: BTreeMap::new(),
            loaded_at: Instant::now(),
            ttl,
            stale: true,
        }
    }

    pub async fn load(
        store: &dyn CatalogStore,
        ttl: Duration,
        timeout: Duration,
    ) -> CatalogResult<Self> {
        let languages = bounded(timeout, store.languages()).await?;
        let taxonomy = bounded(timeout, store.taxonomy()).await?;

        let mut snapshot = Self {
            languages: languages.into_iter().map(|l| (l.code, l.name)).collect(),
            families: BTreeSet::new(),
            genera: BTreeMap::new(),
            loaded_at: Instant::now(),
            ttl,
            stale: false,
        };
        for (family, genus) in taxonomy {
            snapshot.families.insert(family.clone());
            snapshot.genera.insert(genus.to_lowercase(), family);
        }
        tracing::debug!(
            "Loaded lookup snapshot: {} languages, {} families, {} genera",
            snapshot.languages.len(),
            snapshot.families.len(),
            snapshot.genera.len()
        );
        Ok(snapshot)
    }

    pub fn is_expired(&self) -> bool {
        self.stale || self.loaded_at.elapsed() >= self.ttl
    }

    pub fn languages(&self) -> impl Iterator<Item = (&str, &str)> {
        self.languages.iter().map(|(code, name)| (code.as_str(), name.as_str()))
    }

    pub fn has_language(&self, code: &str) -> bool {
        self.languages.contains_key(code)
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.families.iter().map(String::as_str)
    }

    pub fn family_of(&self, genus: &str) -> Option<&str> {
        self.genera.get(&genus.trim().to_lowercase()).map(String::as_str)
    }

    /// Reject codes outside the languages table; an empty table accepts anything
    pub fn check_language(&self, code: &str) -> CatalogResult<()> {
        if self.languages.is_empty() || self.has_language(code) {
            Ok(())
        } else {
            Err(CatalogError::validation(format!(
                "unknown language {:?}",
                code
            )))
        }
    }

    /// A genus already in the catalog must keep its family
    pub fn check_taxonomy(&self, family: &str, genus: &str) -> CatalogResult<()> {
        match self.family_of(genus) {
            Some(known) if !known.eq_ignore_ascii_case(family.trim()) => {
                Err(CatalogError::validation(format!(
                    "genus {} belongs to family {}, not {}",
                    genus.trim(),
                    known,
                    family.trim()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Owner of the current snapshot, shared by reference
pub struct LookupCache {
    current: RwLock<Arc<LookupSnapshot>>,
    ttl: Duration,
}

impl LookupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            current: RwLock::new(Arc::new(LookupSnapshot::empty(ttl))),
            ttl,
        }
    }

    /// The snapshot as it stands, without refreshing
    pub fn snapshot(&self) -> Arc<LookupSnapshot> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Current snapshot, reloading it first when expired
    pub async fn current(
        &self,
        store: &dyn CatalogStore,
        timeout: Duration,
    ) -> CatalogResult<Arc<LookupSnapshot>> {
        let snapshot = self.snapshot();
        if !snapshot.is_expired() {
            return Ok(snapshot);
        }
        self.refresh(store, timeout).await
    }

    pub async fn refresh(
        &self,
        store: &dyn CatalogStore,
        timeout: Duration,
    ) -> CatalogResult<Arc<LookupSnapshot>> {
        let fresh = Arc::new(LookupSnapshot::load(store, self.ttl, timeout).await?);
        match self.current.write() {
            Ok(mut guard) => *guard = fresh.clone(),
            Err(poisoned) => *poisoned.into_inner() = fresh.clone(),
        }
        Ok(fresh)
    }

    /// Mark the snapshot stale so the next `current` reloads it
    pub fn invalidate(&self) {
        let mut stale = (*self.snapshot()).clone();
        stale.stale = true;
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::new(stale),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(stale),
        }
    }
}

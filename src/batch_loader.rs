//! Grouped name loading
//!
//! Resolves display names for a whole result set with at most two store round
//! trips: one grouped lookup for the requested language (tiers 1 and 2) and,
//! only if some plants came back empty and the requested language is not the
//! default, one grouped lookup for the default language (tier 3). Never one
//! query per plant.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::error::CatalogResult;
use crate::localization::rank_names;
use crate::model::{LocalizedName, Locale, Plant, PlantId};
use crate::store::{bounded, CatalogStore};

#[derive(Clone)]
pub struct BatchLoader {
    store: Arc<dyn CatalogStore>,
    default_language: String,
    timeout: Duration,
}

impl BatchLoader {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        default_language: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        // stored names carry normalized codes
        Self {
            store,
            default_language: default_language.into().trim().to_lowercase(),
            timeout,
        }
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Ordered names per plant. Plants with no name in any tier are absent
    /// from the map; callers treat absence as an empty list.
    pub async fn load_names_for(
        &self,
        ids: &[PlantId],
        locale: &Locale,
    ) -> CatalogResult<FxHashMap<PlantId, Vec<String>>> {
        let ids: Vec<PlantId> = ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut resolved = FxHashMap::default();
        if ids.is_empty() {
            return Ok(resolved);
        }

        let rows = bounded(
            self.timeout,
            self.store
                .names_for(&ids, &locale.language, locale.country.as_deref()),
        )
        .await?;
        rank_into(&mut resolved, rows, locale);

        if locale.language == self.default_language {
            return Ok(resolved);
        }

        let missing: Vec<PlantId> = ids
            .iter()
            .filter(|id| !resolved.contains_key(*id))
            .copied()
            .collect();
        if missing.is_empty() {
            return Ok(resolved);
        }

        tracing::debug!(
            "{} of {} plants have no {} names, falling back to {}",
            missing.len(),
            ids.len(),
            locale.tag(),
            self.default_language
        );
        let fallback = Locale {
            language: self.default_language.clone(),
            country: None,
        };
        let rows = bounded(
            self.timeout,
            self.store.names_for(&missing, &fallback.language, None),
        )
        .await?;
        rank_into(&mut resolved, rows, &fallback);

        Ok(resolved)
    }

    /// Fill `common_names` on every plant from one grouped load
    pub async fn attach_names(&self, plants: &mut [Plant], locale: &Locale) -> CatalogResult<()> {
        let ids: Vec<PlantId> = plants.iter().map(|p| p.id).collect();
        let mut names = self.load_names_for(&ids, locale).await?;
        for plant in plants.iter_mut() {
            plant.common_names = names.remove(&plant.id).unwrap_or_default();
        }
        Ok(())
    }
}

fn rank_into(
    resolved: &mut FxHashMap<PlantId, Vec<String>>,
    rows: Vec<LocalizedName>,
    locale: &Locale,
) {
    let mut grouped: FxHashMap<PlantId, Vec<LocalizedName>> = FxHashMap::default();
    for row in rows {
        grouped.entry(row.plant_id).or_default().push(row);
    }
    for (id, rows) in grouped {
        let names = rank_names(&rows, locale);
        if !names.is_empty() {
            resolved.insert(id, names);
        }
    }
}

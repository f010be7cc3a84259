//! Localized display names
//!
//! Name resolution walks a fallback chain and stops at the first tier that
//! yields anything:
//!
//! 1. requested language, requested country
//! 2. requested language, no country (language-global)
//! 3. default language, no country (only when the requested language is not the default)
//! 4. nothing: an empty list, which is a valid answer
//!
//! Tiers 1 and 2 come back from one grouped lookup and are ranked together:
//! country-specific before global, primary before non-primary, then by name.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::batch_loader::BatchLoader;
use crate::error::CatalogResult;
use crate::model::{LocalizedName, Locale, PlantId};

/// True when `name` belongs to tier 1 or 2 of `locale`
pub fn in_locale(name: &LocalizedName, locale: &Locale) -> bool {
    if name.language != locale.language {
        return false;
    }
    match (&name.country, &locale.country) {
        (None, _) => true,
        (Some(theirs), Some(wanted)) => theirs == wanted,
        (Some(_), None) => false,
    }
}

fn display_order(a: &LocalizedName, b: &LocalizedName) -> Ordering {
    // country-specific (Some) sorts ahead of global (None)
    b.country
        .is_some()
        .cmp(&a.country.is_some())
        .then_with(|| b.is_primary.cmp(&a.is_primary))
        .then_with(|| a.name.cmp(&b.name))
}

/// Rank one plant's candidate rows into display order
///
/// Rows outside `locale` are ignored. A name recorded both for the country and
/// globally is returned once, at its country-specific position.
pub fn rank_names<'a, I>(rows: I, locale: &Locale) -> Vec<String>
where
    I: IntoIterator<Item = &'a LocalizedName>,
{
    let mut candidates: Vec<&LocalizedName> =
        rows.into_iter().filter(|n| in_locale(n, locale)).collect();
    candidates.sort_by(|a, b| display_order(a, b));

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|n| seen.insert(n.name.as_str()))
        .map(|n| n.name.clone())
        .collect()
}

/// Resolves names for a single plant on top of the grouped loader
#[derive(Clone)]
pub struct LocalizationResolver {
    loader: BatchLoader,
}

impl LocalizationResolver {
    pub fn new(loader: BatchLoader) -> Self {
        Self { loader }
    }

    /// Ordered display names; empty when no tier has anything
    pub async fn resolve_names(
        &self,
        plant_id: PlantId,
        locale: &Locale,
    ) -> CatalogResult<Vec<String>> {
        let mut names = self.loader.load_names_for(&[plant_id], locale).await?;
        Ok(names.remove(&plant_id).unwrap_or_default())
    }
}

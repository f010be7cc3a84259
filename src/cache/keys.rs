use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::CatalogResult;
use crate::filter::{GrowingConditionsFilter, SearchFilter};
use crate::model::{Locale, PlantId};

/// Operation class of a cached result; selects key prefix and TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheClass {
    Plant,
    PlantBatch,
    Names,
    Search,
    Count,
    ConditionSearch,
    GrowingConditions,
    Physical,
    Companions,
}

impl CacheClass {
    pub fn prefix(self) -> &'static str {
        match self {
            CacheClass::Plant => "plant",
            CacheClass::PlantBatch => "plants",
            CacheClass::Names => "names",
            CacheClass::Search => "search",
            CacheClass::Count => "count",
            CacheClass::ConditionSearch => "growing_search",
            CacheClass::GrowingConditions => "growing",
            CacheClass::Physical => "physical",
            CacheClass::Companions => "companions",
        }
    }

    /// Classes whose entries depend on the whole catalog rather than one plant
    pub const RESULT_SETS: [CacheClass; 4] = [
        CacheClass::Search,
        CacheClass::Count,
        CacheClass::ConditionSearch,
        CacheClass::PlantBatch,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    class: CacheClass,
    key: String,
}

impl CacheKey {
    pub fn class(&self) -> CacheClass {
        self.class
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    fn scoped(class: CacheClass, id: PlantId, suffix: &str) -> Self {
        Self {
            class,
            key: format!("{}:{}:{}", class.prefix(), id, suffix),
        }
    }

    fn hashed(class: CacheClass, params: &Value) -> CatalogResult<Self> {
        Ok(Self {
            class,
            key: format!("{}:{}", class.prefix(), fingerprint(params)?),
        })
    }

    pub fn plant(id: PlantId, locale: &Locale) -> Self {
        Self::scoped(CacheClass::Plant, id, &locale.tag())
    }

    pub fn names(id: PlantId, locale: &Locale) -> Self {
        Self::scoped(CacheClass::Names, id, &locale.tag())
    }

    pub fn growing_conditions(id: PlantId, country: Option<&str>) -> Self {
        Self::scoped(CacheClass::GrowingConditions, id, country.unwrap_or("-"))
    }

    pub fn physical(id: PlantId) -> Self {
        Self {
            class: CacheClass::Physical,
            key: format!("{}:{}", CacheClass::Physical.prefix(), id),
        }
    }

    /// The full, unfiltered companion list of one plant in one locale
    pub fn companions(id: PlantId, locale: &Locale) -> Self {
        Self::scoped(CacheClass::Companions, id, &locale.tag())
    }

    /// Batch lookups are keyed by the id set, so order and duplicates do not matter
    pub fn plant_batch(ids: &[PlantId], locale: &Locale) -> CatalogResult<Self> {
        let ids: BTreeSet<i64> = ids.iter().map(|id| id.get()).collect();
        Self::hashed(
            CacheClass::PlantBatch,
            &json!({ "ids": ids, "locale": locale.tag() }),
        )
    }

    pub fn search(
        text: Option<&str>,
        filter: &SearchFilter,
        locale: &Locale,
    ) -> CatalogResult<Self> {
        Self::hashed(
            CacheClass::Search,
            &json!({
                "text": normalize_text(text),
                "filter": filter,
                "locale": locale.tag(),
            }),
        )
    }

    /// Counts ignore pagination and locale
    pub fn count(text: Option<&str>, filter: &SearchFilter) -> CatalogResult<Self> {
        Self::hashed(
            CacheClass::Count,
            &json!({
                "text": normalize_text(text),
                "filter": filter.without_pagination(),
            }),
        )
    }

    pub fn condition_search(
        filter: &GrowingConditionsFilter,
        locale: &Locale,
    ) -> CatalogResult<Self> {
        Self::hashed(
            CacheClass::ConditionSearch,
            &json!({ "filter": filter, "locale": locale.tag() }),
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

fn normalize_text(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

// ============================================================================
// Fingerprints
// ============================================================================

/// JSON with object keys sorted and null / empty members dropped, so
/// structurally equal parameters always render identically
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn is_vacant(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.values().all(is_vacant),
        _ => false,
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().filter(|k| !is_vacant(&map[*k])).collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Stable hex digest of any serializable parameter set
pub fn fingerprint<T: Serialize + ?Sized>(params: &T) -> CatalogResult<String> {
    let value = serde_json::to_value(params)?;
    let digest = Sha256::digest(canonical_json(&value).as_bytes());
    Ok(hex::encode(&digest[..16]))
}

// ============================================================================
// Invalidation sets
// ============================================================================

/// Keys and glob patterns a write must remove from the cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidation {
    pub keys: Vec<String>,
    pub patterns: Vec<String>,
}

impl Invalidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: CacheKey) -> Self {
        self.keys.push(key.key);
        self
    }

    /// Every key of `class` scoped to plant `id`
    pub fn entity(mut self, class: CacheClass, id: PlantId) -> Self {
        self.patterns.push(format!("{}:{}:*", class.prefix(), id));
        self
    }

    /// Every key of `class`
    pub fn class(mut self, class: CacheClass) -> Self {
        self.patterns.push(format!("{}:*", class.prefix()));
        self
    }

    /// Search, count and batch results: any write can change them
    pub fn result_sets(self) -> Self {
        CacheClass::RESULT_SETS
            .into_iter()
            .fold(self, |inv, class| inv.class(class))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.patterns.is_empty()
    }

    pub fn plant_created(id: PlantId) -> Self {
        Self::new().entity(CacheClass::Plant, id).result_sets()
    }

    /// Other plants' companion lists embed this plant, so they go too
    pub fn plant_updated(id: PlantId) -> Self {
        Self::new()
            .entity(CacheClass::Plant, id)
            .entity(CacheClass::Names, id)
            .class(CacheClass::Companions)
            .result_sets()
    }

    pub fn plant_deleted(id: PlantId) -> Self {
        Self::new()
            .entity(CacheClass::Plant, id)
            .entity(CacheClass::Names, id)
            .entity(CacheClass::GrowingConditions, id)
            .key(CacheKey::physical(id))
            .class(CacheClass::Companions)
            .result_sets()
    }

    pub fn names_changed(id: PlantId) -> Self {
        Self::plant_updated(id)
    }

    pub fn conditions_changed(id: PlantId) -> Self {
        Self::new()
            .entity(CacheClass::GrowingConditions, id)
            .result_sets()
    }

    pub fn physical_changed(id: PlantId) -> Self {
        Self::new().key(CacheKey::physical(id)).result_sets()
    }

    pub fn companion_created(a: PlantId, b: PlantId) -> Self {
        Self::new()
            .entity(CacheClass::Companions, a)
            .entity(CacheClass::Companions, b)
            .result_sets()
    }

    /// The endpoints are unknown, so the whole companion namespace goes
    pub fn companion_deleted() -> Self {
        Self::new().class(CacheClass::Companions).result_sets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::glob_match;
    use crate::model::SunRequirement;

    fn pid(raw: i64) -> PlantId {
        PlantId::new(raw).unwrap()
    }

    #[test]
    fn test_canonical_json_ignores_key_order_and_nulls() {
        let a = json!({"b": 1, "a": {"y": null, "x": [1, 2]}, "c": []});
        let b = json!({"a": {"x": [1, 2]}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&b), r#"{"a":{"x":[1,2]},"b":1}"#);
    }

    #[test]
    fn test_search_keys_are_stable_and_distinct() {
        let en = Locale::new("en", None).unwrap();
        let filter = SearchFilter::new().with_sun(SunRequirement::FullSun);

        let a = CacheKey::search(Some(" Lavender "), &filter, &en).unwrap();
        let b = CacheKey::search(Some("lavender"), &filter.clone(), &en).unwrap();
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("search:"));

        let fr = Locale::new("fr", None).unwrap();
        assert_ne!(a, CacheKey::search(Some("lavender"), &filter, &fr).unwrap());
        assert_ne!(
            a,
            CacheKey::search(Some("lavender"), &filter.clone().with_limit(5), &en).unwrap()
        );
    }

    #[test]
    fn test_count_key_ignores_pagination() {
        let filter = SearchFilter::new().with_genus("Rosa");
        let paged = filter.clone().with_limit(3).with_cursor("abc");
        assert_eq!(
            CacheKey::count(None, &filter).unwrap(),
            CacheKey::count(None, &paged).unwrap()
        );
    }

    #[test]
    fn test_batch_key_ignores_order_and_duplicates() {
        let en = Locale::new("en", None).unwrap();
        assert_eq!(
            CacheKey::plant_batch(&[pid(3), pid(1)], &en).unwrap(),
            CacheKey::plant_batch(&[pid(1), pid(3), pid(1)], &en).unwrap()
        );
    }

    #[test]
    fn test_entity_keys() {
        let gb = Locale::new("en", Some("GB")).unwrap();
        assert_eq!(CacheKey::plant(pid(12), &gb).as_str(), "plant:12:en-GB");
        assert_eq!(CacheKey::growing_conditions(pid(12), None).as_str(), "growing:12:-");
        assert_eq!(CacheKey::physical(pid(12)).as_str(), "physical:12");
        assert_eq!(CacheKey::companions(pid(12), &gb).as_str(), "companions:12:en-GB");
    }

    #[test]
    fn test_companion_create_hits_both_plants_and_result_sets() {
        let en = Locale::new("en", None).unwrap();
        let inv = Invalidation::companion_created(pid(4), pid(9));
        let hit = |key: &str| inv.patterns.iter().any(|p| glob_match(p, key));

        assert!(hit(CacheKey::companions(pid(4), &en).as_str()));
        assert!(hit(CacheKey::companions(pid(9), &en).as_str()));
        assert!(!hit(CacheKey::companions(pid(49), &en).as_str()));
        assert!(hit(CacheKey::search(None, &SearchFilter::new(), &en).unwrap().as_str()));
        assert!(hit(CacheKey::count(None, &SearchFilter::new()).unwrap().as_str()));
    }

    #[test]
    fn test_every_write_clears_result_sets() {
        let id = pid(5);
        let en = Locale::new("en", None).unwrap();
        let search = CacheKey::search(Some("rose"), &SearchFilter::new(), &en).unwrap();
        for inv in [
            Invalidation::plant_created(id),
            Invalidation::plant_updated(id),
            Invalidation::plant_deleted(id),
            Invalidation::names_changed(id),
            Invalidation::conditions_changed(id),
            Invalidation::physical_changed(id),
            Invalidation::companion_created(id, pid(6)),
            Invalidation::companion_deleted(),
        ] {
            assert!(inv.patterns.iter().any(|p| glob_match(p, search.as_str())));
        }
    }

    #[test]
    fn test_companion_delete_clears_whole_namespace() {
        let en = Locale::new("en", None).unwrap();
        let inv = Invalidation::companion_deleted();
        for raw in [1, 77, 1234] {
            let key = CacheKey::companions(pid(raw), &en);
            assert!(inv.patterns.iter().any(|p| glob_match(p, key.as_str())));
        }
    }

    #[test]
    fn test_plant_delete_covers_dependent_keys() {
        let id = pid(8);
        let en = Locale::new("en", None).unwrap();
        let inv = Invalidation::plant_deleted(id);
        let hit = |key: &str| {
            inv.keys.iter().any(|k| k == key) || inv.patterns.iter().any(|p| glob_match(p, key))
        };
        assert!(hit(CacheKey::plant(id, &en).as_str()));
        assert!(hit(CacheKey::names(id, &en).as_str()));
        assert!(hit(CacheKey::growing_conditions(id, Some("GB")).as_str()));
        assert!(hit(CacheKey::physical(id).as_str()));
        assert!(!hit(CacheKey::physical(pid(80)).as_str()));
    }
}

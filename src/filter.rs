//! Request filters
//!
//! Immutable, optional-field filter objects. Every field that is `None` (or an
//! empty set) imposes no constraint. `validate` rejects self-contradictory
//! filters before anything reaches the store.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};
use crate::model::{
    normalize_country, normalize_zone, validate_month, validate_ph_range, Confidence, GrowthRate,
    PlantTrait, SoilType, SunRequirement, WaterRequirement,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Creation order (ascending plant id)
    #[default]
    CreatedAt,
    BotanicalName,
    /// Text relevance; see `SearchComposer` for how it degrades
    Relevance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

// ============================================================================
// Plant search filter
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilter {
    // Taxonomy, case-insensitive exact match
    pub family: Option<String>,
    pub genus: Option<String>,
    pub species: Option<String>,
    pub plant_type: Option<String>,

    // "Can this plant reach / fit": max height >= min_height_m, typical height <= max_height_m
    pub min_height_m: Option<f64>,
    pub max_height_m: Option<f64>,

    // Categorical, any-of
    pub growth_rates: BTreeSet<GrowthRate>,
    pub sun_requirements: BTreeSet<SunRequirement>,
    pub water_requirements: BTreeSet<WaterRequirement>,

    // Whole-token match against the plant's zone list
    pub hardiness_zone: Option<String>,
    pub heat_zone: Option<String>,

    // Interval overlap against the recorded soil pH range
    pub ph_min: Option<f64>,
    pub ph_max: Option<f64>,

    /// Explicitly recorded trait values; unknown traits never match
    pub traits: BTreeMap<PlantTrait, bool>,

    // Pagination
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub sort: SortField,
    pub direction: SortDirection,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_family(mut self, family: &str) -> Self {
        self.family = Some(family.to_string());
        self
    }

    pub fn with_genus(mut self, genus: &str) -> Self {
        self.genus = Some(genus.to_string());
        self
    }

    pub fn with_plant_type(mut self, plant_type: &str) -> Self {
        self.plant_type = Some(plant_type.to_string());
        self
    }

    pub fn with_height_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_height_m = min;
        self.max_height_m = max;
        self
    }

    pub fn with_ph_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.ph_min = min;
        self.ph_max = max;
        self
    }

    pub fn with_sun(mut self, sun: SunRequirement) -> Self {
        self.sun_requirements.insert(sun);
        self
    }

    pub fn with_hardiness_zone(mut self, zone: &str) -> Self {
        self.hardiness_zone = Some(zone.to_string());
        self
    }

    pub fn with_trait(mut self, t: PlantTrait, value: bool) -> Self {
        self.traits.insert(t, value);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_sort(mut self, sort: SortField, direction: SortDirection) -> Self {
        self.sort = sort;
        self.direction = direction;
        self
    }

    /// Same predicates without limit or cursor; the key for counts
    pub fn without_pagination(&self) -> SearchFilter {
        SearchFilter {
            limit: None,
            cursor: None,
            sort: SortField::default(),
            direction: SortDirection::default(),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> CatalogResult<()> {
        if self.limit == Some(0) {
            return Err(CatalogError::validation("limit must be greater than zero"));
        }
        for (label, value) in [("min_height_m", self.min_height_m), ("max_height_m", self.max_height_m)] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(CatalogError::validation(format!(
                        "{} must be a non-negative number, got {}",
                        label, v
                    )));
                }
            }
        }
        if let (Some(min), Some(max)) = (self.min_height_m, self.max_height_m) {
            if min > max {
                return Err(CatalogError::validation(format!(
                    "min_height_m {} exceeds max_height_m {}",
                    min, max
                )));
            }
        }
        validate_ph_range(self.ph_min, self.ph_max)?;
        if let Some(zone) = &self.hardiness_zone {
            normalize_zone("hardiness zone", zone)?;
        }
        if let Some(zone) = &self.heat_zone {
            normalize_zone("heat zone", zone)?;
        }
        for (label, value) in [
            ("family", &self.family),
            ("genus", &self.genus),
            ("species", &self.species),
            ("plant_type", &self.plant_type),
        ] {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(CatalogError::validation(format!("{} must not be blank", label)));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Growing-conditions filter
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowingConditionsFilter {
    pub hardiness_zone: Option<String>,
    pub heat_zone: Option<String>,
    pub sun_requirements: BTreeSet<SunRequirement>,
    pub water_requirements: BTreeSet<WaterRequirement>,
    pub soil_types: BTreeSet<SoilType>,
    pub drought_tolerant: Option<bool>,
    pub salt_tolerant: Option<bool>,
    pub wind_tolerant: Option<bool>,
    pub ph_min: Option<f64>,
    pub ph_max: Option<f64>,
    pub flowering_month: Option<u8>,
    pub fruiting_month: Option<u8>,
    /// Matches assertions at or above this confidence
    pub min_confidence: Option<Confidence>,
    /// Only assertions for this country or country-agnostic ones
    pub country: Option<String>,
    pub limit: Option<usize>,
    /// Opaque token from the previous page's `next_cursor`
    pub cursor: Option<String>,
}

impl GrowingConditionsFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hardiness_zone(mut self, zone: &str) -> Self {
        self.hardiness_zone = Some(zone.to_string());
        self
    }

    pub fn with_min_confidence(mut self, confidence: Confidence) -> Self {
        self.min_confidence = Some(confidence);
        self
    }

    pub fn with_flowering_month(mut self, month: u8) -> Self {
        self.flowering_month = Some(month);
        self
    }

    pub fn with_ph_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.ph_min = min;
        self.ph_max = max;
        self
    }

    pub fn with_country(mut self, country: &str) -> Self {
        self.country = Some(country.to_string());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn validate(&self) -> CatalogResult<()> {
        if self.limit == Some(0) {
            return Err(CatalogError::validation("limit must be greater than zero"));
        }
        validate_ph_range(self.ph_min, self.ph_max)?;
        if let Some(zone) = &self.hardiness_zone {
            normalize_zone("hardiness zone", zone)?;
        }
        if let Some(zone) = &self.heat_zone {
            normalize_zone("heat zone", zone)?;
        }
        if let Some(month) = self.flowering_month {
            validate_month("flowering", month)?;
        }
        if let Some(month) = self.fruiting_month {
            validate_month("fruiting", month)?;
        }
        if let Some(country) = &self.country {
            normalize_country(country)?;
        }
        Ok(())
    }
}

//! Catalog entities
//!
//! Plants and their dependent records: localized names, growing-condition
//! assertions, physical characteristics and companion relationships.
//! Everything here is plain data plus the validation each entity needs before
//! it may be written.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! catalog_id {
    ($name:ident, $entity:expr) => {
        /// Store-assigned identifier, positive and monotonic in creation order
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub struct $name(i64);

        impl $name {
            pub fn new(raw: i64) -> CatalogResult<Self> {
                if raw <= 0 {
                    return Err(CatalogError::validation(format!(
                        "{} id must be positive, got {}",
                        $entity, raw
                    )));
                }
                Ok(Self(raw))
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl TryFrom<i64> for $name {
            type Error = CatalogError;

            fn try_from(raw: i64) -> Result<Self, Self::Error> {
                Self::new(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> i64 {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = CatalogError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw: i64 = s.trim().parse().map_err(|_| {
                    CatalogError::validation(format!("malformed {} id {:?}", $entity, s))
                })?;
                Self::new(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

catalog_id!(PlantId, "plant");
catalog_id!(RelationshipId, "companion relationship");

// ============================================================================
// Categorical enums
// ============================================================================

/// Implements `as_str`, `FromStr`, `Display` and `ALL` for a snake_case enum
macro_rules! catalog_enum {
    ($name:ident, $label:expr, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = CatalogError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(CatalogError::validation(format!(
                        "unknown {} {:?}",
                        $label, other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthRate {
    Slow,
    Moderate,
    Fast,
}

catalog_enum!(GrowthRate, "growth rate", {
    Slow => "slow",
    Moderate => "moderate",
    Fast => "fast",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SunRequirement {
    FullSun,
    PartialSun,
    PartialShade,
    FullShade,
}

catalog_enum!(SunRequirement, "sun requirement", {
    FullSun => "full_sun",
    PartialSun => "partial_sun",
    PartialShade => "partial_shade",
    FullShade => "full_shade",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaterRequirement {
    Low,
    Moderate,
    High,
}

catalog_enum!(WaterRequirement, "water requirement", {
    Low => "low",
    Moderate => "moderate",
    High => "high",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoilType {
    Clay,
    Loam,
    Sand,
    Silt,
    Chalk,
    Peat,
}

catalog_enum!(SoilType, "soil type", {
    Clay => "clay",
    Loam => "loam",
    Sand => "sand",
    Silt => "silt",
    Chalk => "chalk",
    Peat => "peat",
});

/// How certain a growing-condition assertion is
///
/// Declaration order is rank order: `Possible < Probable < Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Possible,
    Probable,
    Confirmed,
}

catalog_enum!(Confidence, "confidence", {
    Possible => "possible",
    Probable => "probable",
    Confirmed => "confirmed",
});

impl Confidence {
    /// Ordinal stored alongside the label so the store can compare ranks
    pub fn rank(self) -> i64 {
        match self {
            Confidence::Possible => 1,
            Confidence::Probable => 2,
            Confidence::Confirmed => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Beneficial,
    Antagonistic,
    Neutral,
}

catalog_enum!(RelationshipType, "relationship type", {
    Beneficial => "beneficial",
    Antagonistic => "antagonistic",
    Neutral => "neutral",
});

/// Boolean traits recorded per plant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlantTrait {
    Evergreen,
    Deciduous,
    Toxic,
    DroughtTolerant,
    SaltTolerant,
    WindTolerant,
}

catalog_enum!(PlantTrait, "plant trait", {
    Evergreen => "evergreen",
    Deciduous => "deciduous",
    Toxic => "toxic",
    DroughtTolerant => "drought_tolerant",
    SaltTolerant => "salt_tolerant",
    WindTolerant => "wind_tolerant",
});

// ============================================================================
// Locale
// ============================================================================

/// Requested language plus optional country, normalized to `xx` / `YY`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locale {
    pub language: String,
    pub country: Option<String>,
}

impl Locale {
    pub fn new(language: &str, country: Option<&str>) -> CatalogResult<Self> {
        Ok(Self {
            language: normalize_language(language)?,
            country: country.map(normalize_country).transpose()?,
        })
    }

    /// Tag used inside cache keys: `en` or `en-GB`
    pub fn tag(&self) -> String {
        match &self.country {
            Some(country) => format!("{}-{}", self.language, country),
            None => self.language.clone(),
        }
    }
}

/// Row of the languages reference table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub code: String,
    pub name: String,
}

impl Language {
    pub fn new(code: &str, name: &str) -> CatalogResult<Self> {
        Ok(Self {
            code: normalize_language(code)?,
            name: required("language name", name)?,
        })
    }
}

/// ISO 639 style code: two or three ASCII letters, lowercased
pub fn normalize_language(raw: &str) -> CatalogResult<String> {
    let code = raw.trim().to_ascii_lowercase();
    if !(2..=3).contains(&code.len()) || !code.chars().all(|c| c.is_ascii_lowercase()) {
        return Err(CatalogError::validation(format!(
            "malformed language code {:?}",
            raw
        )));
    }
    Ok(code)
}

/// ISO 3166 alpha-2 code, uppercased
pub fn normalize_country(raw: &str) -> CatalogResult<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(CatalogError::validation(format!(
            "malformed country code {:?}",
            raw
        )));
    }
    Ok(code)
}

// ============================================================================
// Plant
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
    pub id: PlantId,
    pub family: String,
    pub genus: String,
    pub species: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cultivar: Option<String>,
    /// Always `botanical_name(genus, species, cultivar)`
    pub botanical_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plant_type: Option<String>,
    /// Filled per request by the name loader; never persisted
    #[serde(default)]
    pub common_names: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// "Genus species" with an optional quoted cultivar: `Lavandula angustifolia 'Hidcote'`
pub fn botanical_name(genus: &str, species: &str, cultivar: Option<&str>) -> String {
    match cultivar {
        Some(cultivar) => format!("{} {} '{}'", genus, species, cultivar),
        None => format!("{} {}", genus, species),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPlant {
    pub family: String,
    pub genus: String,
    pub species: String,
    #[serde(default)]
    pub cultivar: Option<String>,
    #[serde(default)]
    pub plant_type: Option<String>,
}

impl NewPlant {
    pub fn new(family: &str, genus: &str, species: &str) -> Self {
        Self {
            family: family.to_string(),
            genus: genus.to_string(),
            species: species.to_string(),
            cultivar: None,
            plant_type: None,
        }
    }

    pub fn with_cultivar(mut self, cultivar: &str) -> Self {
        self.cultivar = Some(cultivar.to_string());
        self
    }

    pub fn with_plant_type(mut self, plant_type: &str) -> Self {
        self.plant_type = Some(plant_type.to_string());
        self
    }

    /// Trimmed copy, rejecting empty taxonomy parts
    pub fn normalized(&self) -> CatalogResult<NewPlant> {
        Ok(NewPlant {
            family: required("family", &self.family)?,
            genus: required("genus", &self.genus)?,
            species: required("species", &self.species)?,
            cultivar: optional(self.cultivar.as_deref()),
            plant_type: optional(self.plant_type.as_deref()).map(|t| t.to_lowercase()),
        })
    }

    pub fn botanical_name(&self) -> String {
        botanical_name(&self.genus, &self.species, self.cultivar.as_deref())
    }
}

/// Partial update; `None` leaves a field untouched, `Some(None)` clears an optional one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlantUpdate {
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub genus: Option<String>,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub cultivar: Option<Option<String>>,
    #[serde(default)]
    pub plant_type: Option<Option<String>>,
}

impl PlantUpdate {
    pub fn is_empty(&self) -> bool {
        self.family.is_none()
            && self.genus.is_none()
            && self.species.is_none()
            && self.cultivar.is_none()
            && self.plant_type.is_none()
    }

    /// Apply onto an existing plant, recomputing the botanical name
    pub fn apply(&self, plant: &mut Plant, now: DateTime<Utc>) -> CatalogResult<()> {
        if let Some(family) = &self.family {
            plant.family = required("family", family)?;
        }
        if let Some(genus) = &self.genus {
            plant.genus = required("genus", genus)?;
        }
        if let Some(species) = &self.species {
            plant.species = required("species", species)?;
        }
        if let Some(cultivar) = &self.cultivar {
            plant.cultivar = optional(cultivar.as_deref());
        }
        if let Some(plant_type) = &self.plant_type {
            plant.plant_type = optional(plant_type.as_deref()).map(|t| t.to_lowercase());
        }
        plant.botanical_name =
            botanical_name(&plant.genus, &plant.species, plant.cultivar.as_deref());
        plant.updated_at = now;
        Ok(())
    }
}

fn required(field: &str, value: &str) -> CatalogResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Localized names
// ============================================================================

/// Unique on (plant, language, country, name). `country == None` is the
/// language-global name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedName {
    pub plant_id: PlantId,
    pub language: String,
    #[serde(default)]
    pub country: Option<String>,
    pub name: String,
    #[serde(default)]
    pub is_primary: bool,
}

impl LocalizedName {
    pub fn new(plant_id: PlantId, language: &str, country: Option<&str>, name: &str) -> Self {
        Self {
            plant_id,
            language: language.to_string(),
            country: country.map(str::to_string),
            name: name.to_string(),
            is_primary: false,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn normalized(&self) -> CatalogResult<LocalizedName> {
        Ok(LocalizedName {
            plant_id: self.plant_id,
            language: normalize_language(&self.language)?,
            country: self.country.as_deref().map(normalize_country).transpose()?,
            name: required("name", &self.name)?,
            is_primary: self.is_primary,
        })
    }

    pub fn unique_key(&self) -> (PlantId, &str, Option<&str>, &str) {
        (
            self.plant_id,
            self.language.as_str(),
            self.country.as_deref(),
            self.name.as_str(),
        )
    }
}

// ============================================================================
// Growing conditions
// ============================================================================

/// One growing-condition assertion for a plant, optionally scoped to a country
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowingConditions {
    pub plant_id: PlantId,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub hardiness_zones: BTreeSet<String>,
    #[serde(default)]
    pub heat_zones: BTreeSet<String>,
    #[serde(default)]
    pub sun_requirements: BTreeSet<SunRequirement>,
    #[serde(default)]
    pub water_requirement: Option<WaterRequirement>,
    #[serde(default)]
    pub soil_types: BTreeSet<SoilType>,
    #[serde(default)]
    pub soil_ph_min: Option<f64>,
    #[serde(default)]
    pub soil_ph_max: Option<f64>,
    #[serde(default)]
    pub drought_tolerant: Option<bool>,
    #[serde(default)]
    pub salt_tolerant: Option<bool>,
    #[serde(default)]
    pub wind_tolerant: Option<bool>,
    #[serde(default)]
    pub flowering_months: BTreeSet<u8>,
    #[serde(default)]
    pub fruiting_months: BTreeSet<u8>,
    pub confidence: Confidence,
}

impl GrowingConditions {
    pub fn new(plant_id: PlantId, confidence: Confidence) -> Self {
        Self {
            plant_id,
            country: None,
            hardiness_zones: BTreeSet::new(),
            heat_zones: BTreeSet::new(),
            sun_requirements: BTreeSet::new(),
            water_requirement: None,
            soil_types: BTreeSet::new(),
            soil_ph_min: None,
            soil_ph_max: None,
            drought_tolerant: None,
            salt_tolerant: None,
            wind_tolerant: None,
            flowering_months: BTreeSet::new(),
            fruiting_months: BTreeSet::new(),
            confidence,
        }
    }

    pub fn normalized(&self) -> CatalogResult<GrowingConditions> {
        let mut out = self.clone();
        out.country = self.country.as_deref().map(normalize_country).transpose()?;
        out.hardiness_zones = normalize_zones("hardiness zone", &self.hardiness_zones)?;
        out.heat_zones = normalize_zones("heat zone", &self.heat_zones)?;
        validate_ph_range(self.soil_ph_min, self.soil_ph_max)?;
        validate_months("flowering", &self.flowering_months)?;
        validate_months("fruiting", &self.fruiting_months)?;
        Ok(out)
    }
}

/// Zone codes are short alphanumeric tokens such as `7b`; they are stored as a
/// delimited list, so the delimiter may not appear inside one.
pub fn normalize_zone(kind: &str, raw: &str) -> CatalogResult<String> {
    let code = raw.trim().to_lowercase();
    if code.is_empty() || code.len() > 8 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CatalogError::validation(format!(
            "malformed {} {:?}",
            kind, raw
        )));
    }
    Ok(code)
}

fn normalize_zones(kind: &str, zones: &BTreeSet<String>) -> CatalogResult<BTreeSet<String>> {
    zones.iter().map(|z| normalize_zone(kind, z)).collect()
}

pub fn validate_ph_range(min: Option<f64>, max: Option<f64>) -> CatalogResult<()> {
    for value in [min, max].into_iter().flatten() {
        if !(0.0..=14.0).contains(&value) {
            return Err(CatalogError::validation(format!(
                "pH {} outside 0-14",
                value
            )));
        }
    }
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(CatalogError::validation(format!(
                "pH minimum {} exceeds maximum {}",
                min, max
            )));
        }
    }
    Ok(())
}

pub fn validate_month(kind: &str, month: u8) -> CatalogResult<()> {
    if !(1..=12).contains(&month) {
        return Err(CatalogError::validation(format!(
            "{} month {} outside 1-12",
            kind, month
        )));
    }
    Ok(())
}

fn validate_months(kind: &str, months: &BTreeSet<u8>) -> CatalogResult<()> {
    months.iter().try_for_each(|m| validate_month(kind, *m))
}

// ============================================================================
// Physical characteristics
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalCharacteristics {
    pub plant_id: PlantId,
    #[serde(default)]
    pub height_typical_m: Option<f64>,
    #[serde(default)]
    pub height_max_m: Option<f64>,
    #[serde(default)]
    pub spread_typical_m: Option<f64>,
    #[serde(default)]
    pub spread_max_m: Option<f64>,
    #[serde(default)]
    pub growth_rate: Option<GrowthRate>,
    /// Recorded traits only; a missing key means "unknown", not `false`
    #[serde(default)]
    pub traits: BTreeMap<PlantTrait, bool>,
}

impl PhysicalCharacteristics {
    pub fn new(plant_id: PlantId) -> Self {
        Self {
            plant_id,
            height_typical_m: None,
            height_max_m: None,
            spread_typical_m: None,
            spread_max_m: None,
            growth_rate: None,
            traits: BTreeMap::new(),
        }
    }

    pub fn with_heights(mut self, typical: Option<f64>, max: Option<f64>) -> Self {
        self.height_typical_m = typical;
        self.height_max_m = max;
        self
    }

    pub fn with_trait(mut self, t: PlantTrait, value: bool) -> Self {
        self.traits.insert(t, value);
        self
    }

    pub fn validate(&self) -> CatalogResult<()> {
        let sizes = [
            ("typical height", self.height_typical_m),
            ("maximum height", self.height_max_m),
            ("typical spread", self.spread_typical_m),
            ("maximum spread", self.spread_max_m),
        ];
        for (label, value) in sizes {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(CatalogError::validation(format!(
                        "{} must be a non-negative number, got {}",
                        label, v
                    )));
                }
            }
        }
        if let (Some(typical), Some(max)) = (self.height_typical_m, self.height_max_m) {
            if typical > max {
                return Err(CatalogError::validation(format!(
                    "typical height {} exceeds maximum height {}",
                    typical, max
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Companion relationships
// ============================================================================

/// Unordered plant pair; stored with `plant_a < plant_b`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanionRelationship {
    pub id: RelationshipId,
    pub plant_a: PlantId,
    pub plant_b: PlantId,
    pub relationship: RelationshipType,
    #[serde(default)]
    pub benefits: BTreeSet<String>,
    #[serde(default)]
    pub optimal_distance_cm: Option<f64>,
    #[serde(default)]
    pub max_distance_cm: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CompanionRelationship {
    pub fn involves(&self, plant: PlantId) -> bool {
        self.plant_a == plant || self.plant_b == plant
    }

    /// The partner of `plant` in this pair, if `plant` is part of it
    pub fn other(&self, plant: PlantId) -> Option<PlantId> {
        if self.plant_a == plant {
            Some(self.plant_b)
        } else if self.plant_b == plant {
            Some(self.plant_a)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCompanionRelationship {
    pub plant_a: PlantId,
    pub plant_b: PlantId,
    pub relationship: RelationshipType,
    #[serde(default)]
    pub benefits: BTreeSet<String>,
    #[serde(default)]
    pub optimal_distance_cm: Option<f64>,
    #[serde(default)]
    pub max_distance_cm: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewCompanionRelationship {
    pub fn new(plant_a: PlantId, plant_b: PlantId, relationship: RelationshipType) -> Self {
        Self {
            plant_a,
            plant_b,
            relationship,
            benefits: BTreeSet::new(),
            optimal_distance_cm: None,
            max_distance_cm: None,
            notes: None,
        }
    }

    pub fn with_spacing(mut self, optimal: Option<f64>, max: Option<f64>) -> Self {
        self.optimal_distance_cm = optimal;
        self.max_distance_cm = max;
        self
    }

    pub fn with_benefit(mut self, tag: &str) -> Self {
        self.benefits.insert(tag.to_string());
        self
    }

    /// Validated copy with the pair ordered and benefit tags lowercased
    pub fn normalized(&self) -> CatalogResult<NewCompanionRelationship> {
        if self.plant_a == self.plant_b {
            return Err(CatalogError::validation(format!(
                "a plant cannot be its own companion ({})",
                self.plant_a
            )));
        }
        for (label, value) in [
            ("optimal distance", self.optimal_distance_cm),
            ("maximum distance", self.max_distance_cm),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(CatalogError::validation(format!(
                        "{} must be a non-negative number, got {}",
                        label, v
                    )));
                }
            }
        }
        if let (Some(optimal), Some(max)) = (self.optimal_distance_cm, self.max_distance_cm) {
            if optimal > max {
                return Err(CatalogError::validation(format!(
                    "optimal distance {} exceeds maximum distance {}",
                    optimal, max
                )));
            }
        }

        let mut benefits = BTreeSet::new();
        for tag in &self.benefits {
            let tag = tag.trim().to_lowercase();
            if tag.is_empty() || tag.contains(',') {
                return Err(CatalogError::validation(format!(
                    "malformed benefit tag {:?}",
                    tag
                )));
            }
            benefits.insert(tag);
        }

        let (plant_a, plant_b) = if self.plant_a < self.plant_b {
            (self.plant_a, self.plant_b)
        } else {
            (self.plant_b, self.plant_a)
        };

        Ok(NewCompanionRelationship {
            plant_a,
            plant_b,
            relationship: self.relationship,
            benefits,
            optimal_distance_cm: self.optimal_distance_cm,
            max_distance_cm: self.max_distance_cm,
            notes: optional(self.notes.as_deref()),
        })
    }
}

/// A relationship seen from one plant, with the partner plant attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Companion {
    pub relationship: CompanionRelationship,
    pub plant: Plant,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(raw: i64) -> PlantId {
        PlantId::new(raw).unwrap()
    }

    #[test]
    fn test_botanical_name() {
        assert_eq!(botanical_name("Rosa", "canina", None), "Rosa canina");
        assert_eq!(
            botanical_name("Lavandula", "angustifolia", Some("Hidcote")),
            "Lavandula angustifolia 'Hidcote'"
        );
    }

    #[test]
    fn test_update_recomputes_botanical_name() {
        let now = Utc::now();
        let mut plant = Plant {
            id: pid(1),
            family: "Lamiaceae".into(),
            genus: "Lavandula".into(),
            species: "angustifolia".into(),
            cultivar: None,
            botanical_name: "Lavandula angustifolia".into(),
            plant_type: None,
            common_names: vec![],
            created_at: now,
            updated_at: now,
        };

        let update = PlantUpdate {
            cultivar: Some(Some("Munstead".into())),
            ..Default::default()
        };
        update.apply(&mut plant, now).unwrap();
        assert_eq!(plant.botanical_name, "Lavandula angustifolia 'Munstead'");

        let update = PlantUpdate {
            species: Some("x intermedia".into()),
            cultivar: Some(None),
            ..Default::default()
        };
        update.apply(&mut plant, now).unwrap();
        assert_eq!(plant.botanical_name, "Lavandula x intermedia");

        let bad = PlantUpdate {
            genus: Some("   ".into()),
            ..Default::default()
        };
        assert!(bad.apply(&mut plant, now).unwrap_err().is_validation());
    }

    #[test]
    fn test_plant_id_parsing() {
        assert_eq!("42".parse::<PlantId>().unwrap().get(), 42);
        assert!("0".parse::<PlantId>().unwrap_err().is_validation());
        assert!("-3".parse::<PlantId>().unwrap_err().is_validation());
        assert!("abc".parse::<PlantId>().unwrap_err().is_validation());
    }

    #[test]
    fn test_locale_normalization() {
        let locale = Locale::new(" EN ", Some("gb")).unwrap();
        assert_eq!(locale.language, "en");
        assert_eq!(locale.country.as_deref(), Some("GB"));
        assert_eq!(locale.tag(), "en-GB");

        assert!(Locale::new("english", None).is_err());
        assert!(Locale::new("en", Some("GBR")).is_err());
        assert_eq!(Locale::new("fr", None).unwrap().tag(), "fr");
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::Possible < Confidence::Probable);
        assert!(Confidence::Probable < Confidence::Confirmed);
        assert!(Confidence::Possible.rank() < Confidence::Confirmed.rank());
        assert_eq!("Confirmed".parse::<Confidence>().unwrap(), Confidence::Confirmed);
        assert!("certain".parse::<Confidence>().is_err());
    }

    #[test]
    fn test_companion_validation() {
        let same = NewCompanionRelationship::new(pid(3), pid(3), RelationshipType::Beneficial);
        assert!(same.normalized().unwrap_err().is_validation());

        let bad_spacing = NewCompanionRelationship::new(pid(1), pid(2), RelationshipType::Neutral)
            .with_spacing(Some(60.0), Some(30.0));
        assert!(bad_spacing.normalized().unwrap_err().is_validation());

        let swapped = NewCompanionRelationship::new(pid(9), pid(2), RelationshipType::Beneficial)
            .with_spacing(Some(30.0), Some(30.0))
            .with_benefit(" Pest-Deterrent ");
        let normalized = swapped.normalized().unwrap();
        assert_eq!(normalized.plant_a, pid(2));
        assert_eq!(normalized.plant_b, pid(9));
        assert!(normalized.benefits.contains("pest-deterrent"));
    }

    #[test]
    fn test_growing_conditions_validation() {
        let mut conditions = GrowingConditions::new(pid(1), Confidence::Probable);
        conditions.hardiness_zones.insert(" 7B ".into());
        conditions.soil_ph_min = Some(6.0);
        conditions.soil_ph_max = Some(7.5);
        let normalized = conditions.normalized().unwrap();
        assert!(normalized.hardiness_zones.contains("7b"));

        conditions.hardiness_zones.insert("7a,7b".into());
        assert!(conditions.normalized().is_err());

        let mut inverted = GrowingConditions::new(pid(1), Confidence::Possible);
        inverted.soil_ph_min = Some(8.0);
        inverted.soil_ph_max = Some(6.0);
        assert!(inverted.normalized().is_err());

        let mut months = GrowingConditions::new(pid(1), Confidence::Possible);
        months.flowering_months.insert(13);
        assert!(months.normalized().is_err());
    }

    #[test]
    fn test_companion_other() {
        let now = Utc::now();
        let rel = CompanionRelationship {
            id: RelationshipId::new(1).unwrap(),
            plant_a: pid(1),
            plant_b: pid(2),
            relationship: RelationshipType::Beneficial,
            benefits: BTreeSet::new(),
            optimal_distance_cm: None,
            max_distance_cm: None,
            notes: None,
            created_at: now,
        };
        assert_eq!(rel.other(pid(1)), Some(pid(2)));
        assert_eq!(rel.other(pid(2)), Some(pid(1)));
        assert_eq!(rel.other(pid(3)), None);
        assert!(rel.involves(pid(2)));
    }

    #[test]
    fn test_ids_deserialize_through_validation() {
        assert_eq!(serde_json::from_str::<PlantId>("5").unwrap(), pid(5));
        assert!(serde_json::from_str::<PlantId>("0").is_err());
        assert!(serde_json::from_str::<RelationshipId>("-3").is_err());
        assert_eq!(serde_json::to_string(&pid(7)).unwrap(), "7");
    }
}

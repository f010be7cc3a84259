//! Catalog seed loading
//!
//! A seed is one JSON document holding languages, plants with their names,
//! growing conditions and physical characteristics, and companion pairs.
//! Plants are referenced from companion entries by their `key`, or by
//! botanical name when no key was given.
//!
//! ```json
//! {
//!   "languages": [{"code": "en", "name": "English"}],
//!   "plants": [{
//!     "key": "basil",
//!     "family": "Lamiaceae", "genus": "Ocimum", "species": "basilicum",
//!     "names": [{"language": "en", "name": "Basil", "primary": true}],
//!     "conditions": [{"confidence": "confirmed", "sun_requirements": ["full_sun"]}],
//!     "physical": {"height_max_m": 0.6}
//!   }],
//!   "companions": [{"a": "basil", "b": "Solanum lycopersicum", "relationship": "beneficial"}]
//! }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::PlantCatalog;
use crate::model::{
    GrowingConditions, Language, LocalizedName, NewCompanionRelationship, NewPlant,
    PhysicalCharacteristics, PlantId, RelationshipType,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogSeed {
    pub languages: Vec<Language>,
    pub plants: Vec<SeedPlant>,
    pub companions: Vec<SeedCompanion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedPlant {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(flatten)]
    pub plant: NewPlant,
    #[serde(default)]
    pub names: Vec<SeedName>,
    /// Growing-condition records without `plant_id`
    #[serde(default)]
    pub conditions: Vec<Value>,
    #[serde(default)]
    pub physical: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedName {
    pub language: String,
    #[serde(default)]
    pub country: Option<String>,
    pub name: String,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedCompanion {
    pub a: String,
    pub b: String,
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

/// Row counts written by `CatalogSeed::apply`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub languages: usize,
    pub plants: usize,
    pub names: usize,
    pub conditions: usize,
    pub physical: usize,
    pub companions: usize,
}

impl CatalogSeed {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid seed file: {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse catalog seed")
    }

    /// Write the seed through the catalog's write path
    ///
    /// Languages go first so names can be checked against them. All names are
    /// inserted as one batch once every plant exists.
    pub async fn apply(&self, catalog: &PlantCatalog) -> Result<SeedReport> {
        let mut report = SeedReport::default();

        for language in &self.languages {
            catalog
                .add_language(language)
                .await
                .with_context(|| format!("Failed to add language {}", language.code))?;
            report.languages += 1;
        }

        let mut refs: HashMap<String, PlantId> = HashMap::new();
        let mut names = Vec::new();
        for entry in &self.plants {
            let plant = catalog.create_plant(&entry.plant).await.with_context(|| {
                format!("Failed to create plant {}", entry.plant.botanical_name())
            })?;
            report.plants += 1;

            refs.insert(plant.botanical_name.clone(), plant.id);
            if let Some(key) = &entry.key {
                if refs.insert(key.clone(), plant.id).is_some() {
                    anyhow::bail!("Duplicate plant key {:?} in seed", key);
                }
            }

            names.extend(entry.names.iter().map(|n| {
                let name = LocalizedName::new(plant.id, &n.language, n.country.as_deref(), &n.name);
                if n.primary {
                    name.primary()
                } else {
                    name
                }
            }));

            if !entry.conditions.is_empty() {
                let conditions = entry
                    .conditions
                    .iter()
                    .map(|raw| with_plant_id::<GrowingConditions>(raw, plant.id))
                    .collect::<Result<Vec<_>>>()
                    .with_context(|| {
                        format!("Invalid growing conditions for {}", plant.botanical_name)
                    })?;
                catalog.set_growing_conditions(plant.id, &conditions).await?;
                report.conditions += conditions.len();
            }

            if let Some(raw) = &entry.physical {
                let physical = with_plant_id::<PhysicalCharacteristics>(raw, plant.id)
                    .with_context(|| {
                        format!("Invalid physical characteristics for {}", plant.botanical_name)
                    })?;
                catalog.set_physical_characteristics(&physical).await?;
                report.physical += 1;
            }
        }

        if !names.is_empty() {
            report.names = catalog
                .add_localized_names(&names)
                .await
                .context("Failed to add localized names")?;
        }

        for pair in &self.companions {
            let resolve = |reference: &str| {
                refs.get(reference)
                    .copied()
                    .with_context(|| format!("Companion refers to unknown plant {:?}", reference))
            };
            let relationship = NewCompanionRelationship {
                plant_a: resolve(&pair.a)?,
                plant_b: resolve(&pair.b)?,
                relationship: pair.relationship,
                benefits: pair.benefits.clone(),
                optimal_distance_cm: pair.optimal_distance_cm,
                max_distance_cm: pair.max_distance_cm,
                notes: pair.notes.clone(),
            };
            catalog
                .create_companion_relationship(&relationship)
                .await
                .with_context(|| format!("Failed to relate {} and {}", pair.a, pair.b))?;
            report.companions += 1;
        }

        tracing::info!(
            "Seeded {} plants, {} names, {} condition records, {} companion pairs",
            report.plants,
            report.names,
            report.conditions,
            report.companions
        );
        Ok(report)
    }
}

fn with_plant_id<T: serde::de::DeserializeOwned>(raw: &Value, id: PlantId) -> Result<T> {
    let mut value = raw.clone();
    match value.as_object_mut() {
        Some(object) => {
            object.insert("plant_id".to_string(), Value::from(id.get()));
        }
        None => anyhow::bail!("expected a JSON object, got {}", raw),
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::companion::CompanionFilter;
    use crate::config::CatalogConfig;
    use crate::model::Locale;
    use crate::query_engine::QueryEngine;

    const SEED: &str = r#"{
        "languages": [{"code": "en", "name": "English"}, {"code": "fr", "name": "Français"}],
        "plants": [
            {
                "key": "basil",
                "family": "Lamiaceae", "genus": "Ocimum", "species": "basilicum",
                "names": [
                    {"language": "en", "name": "Basil", "primary": true},
                    {"language": "fr", "name": "Basilic"}
                ],
                "conditions": [{"confidence": "confirmed", "hardiness_zones": ["10", "11"]}],
                "physical": {"height_typical_m": 0.4, "height_max_m": 0.6}
            },
            {
                "family": "Solanaceae", "genus": "Solanum", "species": "lycopersicum",
                "names": [{"language": "en", "name": "Tomato"}]
            }
        ],
        "companions": [
            {"a": "basil", "b": "Solanum lycopersicum", "relationship": "beneficial",
             "benefits": ["pest_control"]}
        ]
    }"#;

    #[tokio::test]
    async fn test_apply_seed() {
        let engine = Arc::new(QueryEngine::new().unwrap());
        let catalog = PlantCatalog::with_memory_cache(
            engine,
            CatalogConfig::default().with_background_populate(false),
        );
        let report = CatalogSeed::from_json(SEED).unwrap().apply(&catalog).await.unwrap();
        assert_eq!(
            report,
            SeedReport {
                languages: 2,
                plants: 2,
                names: 3,
                conditions: 1,
                physical: 1,
                companions: 1,
            }
        );

        let fr = Locale::new("fr", None).unwrap();
        let basil = PlantId::new(1).unwrap();
        assert_eq!(catalog.resolve_names(basil, &fr).await.unwrap(), vec!["Basilic"]);
        let companions = catalog
            .get_companions(basil, &CompanionFilter::new(), &fr)
            .await
            .unwrap();
        assert_eq!(companions.len(), 1);
        // no French name for the tomato: default-language fallback
        assert_eq!(companions[0].plant.common_names, vec!["Tomato"]);
    }

    #[tokio::test]
    async fn test_unknown_companion_reference_fails() {
        let raw = r#"{
            "plants": [{"family": "Lamiaceae", "genus": "Ocimum", "species": "basilicum"}],
            "companions": [{"a": "Ocimum basilicum", "b": "nope", "relationship": "neutral"}]
        }"#;
        let engine = Arc::new(QueryEngine::new().unwrap());
        let catalog = PlantCatalog::with_memory_cache(engine, CatalogConfig::default());
        let err = CatalogSeed::from_json(raw).unwrap().apply(&catalog).await.unwrap_err();
        assert!(format!("{:#}", err).contains("unknown plant"));
    }
}

//! Typed predicate builder (filter compiler)
//!
//! Filters are compiled into a list of `Predicate`s, one tagged variant per
//! comparison kind. The list is ANDed. Translation into DataFusion expressions
//! happens in exactly one place, `Predicate::to_expr`, so operator semantics
//! live here and nowhere else:
//!
//! | kind | semantics |
//! |---|---|
//! | `Equals` | case-insensitive string equality |
//! | `AtLeast` / `AtMost` | inclusive numeric bound |
//! | `OneOf` | single-valued categorical column is in the requested set |
//! | `HasToken` | delimited list contains the token as a whole element |
//! | `HasAnyToken` | delimited list shares at least one element with the request |
//! | `Overlaps` | recorded `[min, max]` interval overlaps the requested one |
//! | `Flag` | boolean explicitly recorded as the requested value |
//! | `MinRank` | ordinal rank >= requested |
//! | `ContainsText` | case-insensitive substring over any of several columns |
//!
//! Every comparison against a NULL column is false, which gives "unknown never
//! matches" for free.

use datafusion::prelude::*;

use crate::error::CatalogResult;
use crate::filter::{GrowingConditionsFilter, SearchFilter};
use crate::model::{normalize_country, normalize_zone, PlantTrait};

/// Separator for list-valued columns; stored lists carry it at both ends
pub const LIST_DELIMITER: char = ',';

/// Encode a list column as `,a,b,` so a whole-token test is a substring test
/// for `,token,`
pub fn encode_list<I, S>(items: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let parts: Vec<String> = items
        .into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(format!(
        "{d}{}{d}",
        parts.join(&LIST_DELIMITER.to_string()),
        d = LIST_DELIMITER
    ))
}

/// Inverse of `encode_list`
pub fn decode_list(encoded: Option<&str>) -> Vec<String> {
    encoded
        .unwrap_or("")
        .split(LIST_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Columns
// ============================================================================

/// Every column a predicate may reference, across the `plants`,
/// `growing_conditions` and `companions` tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    // plants
    PlantId,
    Family,
    Genus,
    Species,
    PlantType,
    BotanicalName,
    CommonNames,
    HeightTypical,
    HeightMax,
    GrowthRate,
    Trait(PlantTrait),

    // growing_conditions
    Country,
    HardinessZones,
    HeatZones,
    SunRequirements,
    WaterRequirement,
    SoilTypes,
    PhMin,
    PhMax,
    DroughtTolerant,
    SaltTolerant,
    WindTolerant,
    FloweringMonths,
    FruitingMonths,
    ConfidenceRank,

    // companions
    PlantA,
    PlantB,
    RelationshipType,
}

impl Column {
    pub fn name(self) -> &'static str {
        match self {
            Column::PlantId => "plant_id",
            Column::Family => "family",
            Column::Genus => "genus",
            Column::Species => "species",
            Column::PlantType => "plant_type",
            Column::BotanicalName => "botanical_name",
            Column::CommonNames => "common_names",
            Column::HeightTypical => "height_typical_m",
            Column::HeightMax => "height_max_m",
            Column::GrowthRate => "growth_rate",
            Column::Trait(t) => trait_column(t),
            Column::Country => "country",
            Column::HardinessZones => "hardiness_zones",
            Column::HeatZones => "heat_zones",
            Column::SunRequirements => "sun_requirements",
            Column::WaterRequirement => "water_requirement",
            Column::SoilTypes => "soil_types",
            Column::PhMin => "soil_ph_min",
            Column::PhMax => "soil_ph_max",
            Column::DroughtTolerant => "drought_tolerant",
            Column::SaltTolerant => "salt_tolerant",
            Column::WindTolerant => "wind_tolerant",
            Column::FloweringMonths => "flowering_months",
            Column::FruitingMonths => "fruiting_months",
            Column::ConfidenceRank => "confidence_rank",
            Column::PlantA => "plant_a",
            Column::PlantB => "plant_b",
            Column::RelationshipType => "relationship_type",
        }
    }
}

/// Column holding a trait in the denormalized plants table
pub fn trait_column(t: PlantTrait) -> &'static str {
    match t {
        PlantTrait::Evergreen => "trait_evergreen",
        PlantTrait::Deciduous => "trait_deciduous",
        PlantTrait::Toxic => "trait_toxic",
        PlantTrait::DroughtTolerant => "trait_drought_tolerant",
        PlantTrait::SaltTolerant => "trait_salt_tolerant",
        PlantTrait::WindTolerant => "trait_wind_tolerant",
    }
}

// ============================================================================
// Predicates
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals { column: Column, value: String },
    AtLeast { column: Column, value: f64 },
    AtMost { column: Column, value: f64 },
    OneOf { column: Column, values: Vec<String> },
    HasToken { column: Column, token: String },
    HasAnyToken { column: Column, tokens: Vec<String> },
    Overlaps {
        min_column: Column,
        max_column: Column,
        min: Option<f64>,
        max: Option<f64>,
    },
    Flag { column: Column, value: bool },
    MinRank { column: Column, rank: i64 },
    IdEquals { column: Column, id: i64 },
    ContainsText { columns: Vec<Column>, needle: String },
    /// Country-scoped rows: the given country or rows without one
    CountryOrGlobal { column: Column, country: String },
    AnyOf(Vec<Predicate>),
}

impl Predicate {
    /// The single translation step from typed predicate to query expression
    pub fn to_expr(&self) -> Expr {
        match self {
            Predicate::Equals { column, value } => {
                lower(col(column.name())).eq(lit(value.to_lowercase()))
            }
            Predicate::AtLeast { column, value } => col(column.name()).gt_eq(lit(*value)),
            Predicate::AtMost { column, value } => col(column.name()).lt_eq(lit(*value)),
            Predicate::OneOf { column, values } => col(column.name())
                .in_list(values.iter().map(|v| lit(v.clone())).collect(), false),
            Predicate::HasToken { column, token } => token_expr(*column, token),
            Predicate::HasAnyToken { column, tokens } => tokens
                .iter()
                .map(|t| token_expr(*column, t))
                .reduce(Expr::or)
                .unwrap_or_else(|| lit(false)),
            Predicate::Overlaps {
                min_column,
                max_column,
                min,
                max,
            } => {
                // [a, b] overlaps [c, d] iff a <= d and b >= c
                let lower_bound = min.map(|c| col(max_column.name()).gt_eq(lit(c)));
                let upper_bound = max.map(|d| col(min_column.name()).lt_eq(lit(d)));
                match (lower_bound, upper_bound) {
                    (Some(l), Some(u)) => l.and(u),
                    (Some(l), None) => l,
                    (None, Some(u)) => u,
                    (None, None) => lit(true),
                }
            }
            Predicate::Flag { column, value } => col(column.name()).eq(lit(*value)),
            Predicate::MinRank { column, rank } => col(column.name()).gt_eq(lit(*rank)),
            Predicate::IdEquals { column, id } => col(column.name()).eq(lit(*id)),
            Predicate::ContainsText { columns, needle } => {
                let needle = needle.to_lowercase();
                columns
                    .iter()
                    .map(|c| strpos(lower(col(c.name())), lit(needle.clone())).gt(lit(0)))
                    .reduce(Expr::or)
                    .unwrap_or_else(|| lit(false))
            }
            Predicate::CountryOrGlobal { column, country } => col(column.name())
                .eq(lit(country.clone()))
                .or(col(column.name()).is_null()),
            Predicate::AnyOf(preds) => preds
                .iter()
                .map(Predicate::to_expr)
                .reduce(Expr::or)
                .unwrap_or_else(|| lit(false)),
        }
    }
}

fn token_expr(column: Column, token: &str) -> Expr {
    let needle = format!(
        "{d}{}{d}",
        token.trim().to_lowercase(),
        d = LIST_DELIMITER
    );
    strpos(col(column.name()), lit(needle)).gt(lit(0))
}

/// AND of all predicates; `None` when there is nothing to constrain
pub fn conjunction(predicates: &[Predicate]) -> Option<Expr> {
    predicates.iter().map(Predicate::to_expr).reduce(Expr::and)
}

// ============================================================================
// Compilation
// ============================================================================

/// A search filter split by the table each predicate applies to
///
/// `plant` predicates run against the plants table. `conditions` predicates
/// are ANDed against a single growing-conditions row: a plant matches when at
/// least one of its assertions satisfies all of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilter {
    pub plant: Vec<Predicate>,
    pub conditions: Vec<Predicate>,
}

impl CompiledFilter {
    pub fn is_empty(&self) -> bool {
        self.plant.is_empty() && self.conditions.is_empty()
    }

    /// Add the free-text match over the botanical and all-language common-name corpora
    pub fn with_text(mut self, text: Option<&str>) -> Self {
        if let Some(needle) = text.map(str::trim).filter(|t| !t.is_empty()) {
            self.plant.push(Predicate::ContainsText {
                columns: vec![Column::BotanicalName, Column::CommonNames],
                needle: needle.to_string(),
            });
        }
        self
    }
}

/// Compile a plant search filter; rejects inconsistent filters first
pub fn compile_search(filter: &SearchFilter) -> CatalogResult<CompiledFilter> {
    filter.validate()?;

    let mut plant = Vec::new();
    let mut conditions = Vec::new();

    for (column, value) in [
        (Column::Family, &filter.family),
        (Column::Genus, &filter.genus),
        (Column::Species, &filter.species),
        (Column::PlantType, &filter.plant_type),
    ] {
        if let Some(value) = value {
            plant.push(Predicate::Equals {
                column,
                value: value.trim().to_string(),
            });
        }
    }

    if let Some(min) = filter.min_height_m {
        plant.push(Predicate::AtLeast {
            column: Column::HeightMax,
            value: min,
        });
    }
    if let Some(max) = filter.max_height_m {
        plant.push(Predicate::AtMost {
            column: Column::HeightTypical,
            value: max,
        });
    }

    if !filter.growth_rates.is_empty() {
        plant.push(Predicate::OneOf {
            column: Column::GrowthRate,
            values: filter.growth_rates.iter().map(|g| g.as_str().to_string()).collect(),
        });
    }

    for (t, value) in &filter.traits {
        plant.push(Predicate::Flag {
            column: Column::Trait(*t),
            value: *value,
        });
    }

    if !filter.sun_requirements.is_empty() {
        conditions.push(Predicate::HasAnyToken {
            column: Column::SunRequirements,
            tokens: filter.sun_requirements.iter().map(|s| s.as_str().to_string()).collect(),
        });
    }
    if !filter.water_requirements.is_empty() {
        conditions.push(Predicate::OneOf {
            column: Column::WaterRequirement,
            values: filter.water_requirements.iter().map(|w| w.as_str().to_string()).collect(),
        });
    }
    if let Some(zone) = &filter.hardiness_zone {
        conditions.push(Predicate::HasToken {
            column: Column::HardinessZones,
            token: normalize_zone("hardiness zone", zone)?,
        });
    }
    if let Some(zone) = &filter.heat_zone {
        conditions.push(Predicate::HasToken {
            column: Column::HeatZones,
            token: normalize_zone("heat zone", zone)?,
        });
    }
    if filter.ph_min.is_some() || filter.ph_max.is_some() {
        conditions.push(Predicate::Overlaps {
            min_column: Column::PhMin,
            max_column: Column::PhMax,
            min: filter.ph_min,
            max: filter.ph_max,
        });
    }

    Ok(CompiledFilter { plant, conditions })
}

/// Compile a growing-conditions filter into predicates over one assertion row
pub fn compile_conditions(filter: &GrowingConditionsFilter) -> CatalogResult<Vec<Predicate>> {
    filter.validate()?;

    let mut out = Vec::new();

    if let Some(zone) = &filter.hardiness_zone {
        out.push(Predicate::HasToken {
            column: Column::HardinessZones,
            token: normalize_zone("hardiness zone", zone)?,
        });
    }
    if let Some(zone) = &filter.heat_zone {
        out.push(Predicate::HasToken {
            column: Column::HeatZones,
            token: normalize_zone("heat zone", zone)?,
        });
    }
    if !filter.sun_requirements.is_empty() {
        out.push(Predicate::HasAnyToken {
            column: Column::SunRequirements,
            tokens: filter.sun_requirements.iter().map(|s| s.as_str().to_string()).collect(),
        });
    }
    if !filter.water_requirements.is_empty() {
        out.push(Predicate::OneOf {
            column: Column::WaterRequirement,
            values: filter.water_requirements.iter().map(|w| w.as_str().to_string()).collect(),
        });
    }
    if !filter.soil_types.is_empty() {
        out.push(Predicate::HasAnyToken {
            column: Column::SoilTypes,
            tokens: filter.soil_types.iter().map(|s| s.as_str().to_string()).collect(),
        });
    }
    for (column, value) in [
        (Column::DroughtTolerant, filter.drought_tolerant),
        (Column::SaltTolerant, filter.salt_tolerant),
        (Column::WindTolerant, filter.wind_tolerant),
    ] {
        if let Some(value) = value {
            out.push(Predicate::Flag { column, value });
        }
    }
    if filter.ph_min.is_some() || filter.ph_max.is_some() {
        out.push(Predicate::Overlaps {
            min_column: Column::PhMin,
            max_column: Column::PhMax,
            min: filter.ph_min,
            max: filter.ph_max,
        });
    }
    if let Some(month) = filter.flowering_month {
        out.push(Predicate::HasToken {
            column: Column::FloweringMonths,
            token: month.to_string(),
        });
    }
    if let Some(month) = filter.fruiting_month {
        out.push(Predicate::HasToken {
            column: Column::FruitingMonths,
            token: month.to_string(),
        });
    }
    if let Some(confidence) = filter.min_confidence {
        out.push(Predicate::MinRank {
            column: Column::ConfidenceRank,
            rank: confidence.rank(),
        });
    }
    if let Some(country) = &filter.country {
        out.push(Predicate::CountryOrGlobal {
            column: Column::Country,
            country: normalize_country(country)?,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Confidence, SunRequirement};

    #[test]
    fn test_list_encoding() {
        assert_eq!(encode_list(["5A", " 6b "]).as_deref(), Some(",5a,6b,"));
        assert_eq!(encode_list(Vec::<String>::new()), None);
        assert_eq!(decode_list(Some(",5a,6b,")), vec!["5a", "6b"]);
        assert!(decode_list(None).is_empty());
    }

    #[test]
    fn test_absent_fields_impose_nothing() {
        let compiled = compile_search(&SearchFilter::new()).unwrap();
        assert!(compiled.is_empty());
        assert!(conjunction(&compiled.plant).is_none());
    }

    #[test]
    fn test_height_asks_can_it_reach_and_fit() {
        let filter = SearchFilter::new().with_height_range(Some(5.0), Some(8.0));
        let compiled = compile_search(&filter).unwrap();
        assert_eq!(
            compiled.plant,
            vec![
                Predicate::AtLeast { column: Column::HeightMax, value: 5.0 },
                Predicate::AtMost { column: Column::HeightTypical, value: 8.0 },
            ]
        );
    }

    #[test]
    fn test_condition_predicates_are_separated() {
        let filter = SearchFilter::new()
            .with_genus(" Rosa ")
            .with_hardiness_zone("7B")
            .with_sun(SunRequirement::FullSun)
            .with_ph_range(Some(6.0), None)
            .with_trait(PlantTrait::Evergreen, true);
        let compiled = compile_search(&filter).unwrap();

        assert_eq!(compiled.plant.len(), 2);
        assert!(compiled.plant.contains(&Predicate::Equals {
            column: Column::Genus,
            value: "Rosa".into()
        }));
        assert!(compiled.plant.contains(&Predicate::Flag {
            column: Column::Trait(PlantTrait::Evergreen),
            value: true
        }));
        assert!(compiled.conditions.contains(&Predicate::HasToken {
            column: Column::HardinessZones,
            token: "7b".into()
        }));
        assert!(compiled.conditions.contains(&Predicate::Overlaps {
            min_column: Column::PhMin,
            max_column: Column::PhMax,
            min: Some(6.0),
            max: None,
        }));
    }

    #[test]
    fn test_inconsistent_filter_never_compiles() {
        let filter = SearchFilter::new().with_height_range(Some(9.0), Some(1.0));
        assert!(compile_search(&filter).unwrap_err().is_validation());
    }

    #[test]
    fn test_text_predicate_spans_both_corpora() {
        let compiled = CompiledFilter::default().with_text(Some("  lavender "));
        assert_eq!(
            compiled.plant,
            vec![Predicate::ContainsText {
                columns: vec![Column::BotanicalName, Column::CommonNames],
                needle: "lavender".into(),
            }]
        );
        assert!(CompiledFilter::default().with_text(Some("   ")).is_empty());
    }

    #[test]
    fn test_conditions_compile() {
        let filter = GrowingConditionsFilter::new()
            .with_min_confidence(Confidence::Probable)
            .with_flowering_month(6)
            .with_country("gb");
        let predicates = compile_conditions(&filter).unwrap();
        assert_eq!(
            predicates,
            vec![
                Predicate::HasToken { column: Column::FloweringMonths, token: "6".into() },
                Predicate::MinRank { column: Column::ConfidenceRank, rank: 2 },
                Predicate::CountryOrGlobal { column: Column::Country, country: "GB".into() },
            ]
        );
    }

    #[test]
    fn test_translation_produces_expressions() {
        let overlap = Predicate::Overlaps {
            min_column: Column::PhMin,
            max_column: Column::PhMax,
            min: Some(6.0),
            max: Some(7.0),
        };
        let rendered = overlap.to_expr().to_string();
        assert!(rendered.contains("soil_ph_max"));
        assert!(rendered.contains("soil_ph_min"));

        let empty_any = Predicate::AnyOf(vec![]);
        assert_eq!(empty_any.to_expr(), lit(false));
    }
}

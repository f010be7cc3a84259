//! Companion relationship filter
//!
//! One filter type serves two purposes: `matches` filters relationships already
//! in memory, and `predicates` turns the same conditions into store predicates.

use serde::{Deserialize, Serialize};

use crate::model::{CompanionRelationship, PlantId, RelationshipType};
use crate::predicate::{Column, Predicate};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionFilter {
    /// Relationships in which this plant takes part, on either side
    pub plant_id: Option<PlantId>,
    pub relationship: Option<RelationshipType>,
    pub beneficial_only: bool,
    pub exclude_neutral: bool,
}

impl CompanionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_plant(plant_id: PlantId) -> Self {
        Self {
            plant_id: Some(plant_id),
            ..Self::default()
        }
    }

    pub fn with_relationship(mut self, relationship: RelationshipType) -> Self {
        self.relationship = Some(relationship);
        self
    }

    pub fn beneficial_only(mut self) -> Self {
        self.beneficial_only = true;
        self
    }

    pub fn excluding_neutral(mut self) -> Self {
        self.exclude_neutral = true;
        self
    }

    /// Relationship types this filter lets through
    fn allowed_types(&self) -> Vec<RelationshipType> {
        RelationshipType::ALL
            .iter()
            .copied()
            .filter(|t| self.relationship.map_or(true, |wanted| wanted == *t))
            .filter(|t| !self.beneficial_only || *t == RelationshipType::Beneficial)
            .filter(|t| !self.exclude_neutral || *t != RelationshipType::Neutral)
            .collect()
    }

    fn constrains_type(&self) -> bool {
        self.relationship.is_some() || self.beneficial_only || self.exclude_neutral
    }

    pub fn matches(&self, rel: &CompanionRelationship) -> bool {
        if let Some(plant) = self.plant_id {
            if !rel.involves(plant) {
                return false;
            }
        }
        !self.constrains_type() || self.allowed_types().contains(&rel.relationship)
    }

    pub fn predicates(&self) -> Vec<Predicate> {
        let mut out = Vec::new();
        if let Some(plant) = self.plant_id {
            out.push(Predicate::AnyOf(vec![
                Predicate::IdEquals {
                    column: Column::PlantA,
                    id: plant.get(),
                },
                Predicate::IdEquals {
                    column: Column::PlantB,
                    id: plant.get(),
                },
            ]));
        }
        if self.constrains_type() {
            // e.g. neutral + beneficial_only: nothing can match
            let types = self.allowed_types();
            if types.is_empty() {
                out.push(Predicate::AnyOf(Vec::new()));
            } else {
                out.push(Predicate::OneOf {
                    column: Column::RelationshipType,
                    values: types.iter().map(|t| t.as_str().to_string()).collect(),
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    use crate::model::RelationshipId;

    fn rel(a: i64, b: i64, relationship: RelationshipType) -> CompanionRelationship {
        CompanionRelationship {
            id: RelationshipId::new(1).unwrap(),
            plant_a: PlantId::new(a).unwrap(),
            plant_b: PlantId::new(b).unwrap(),
            relationship,
            benefits: BTreeSet::new(),
            optimal_distance_cm: None,
            max_distance_cm: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_plant_scope_either_side() {
        let filter = CompanionFilter::for_plant(PlantId::new(2).unwrap());
        assert!(filter.matches(&rel(1, 2, RelationshipType::Neutral)));
        assert!(filter.matches(&rel(2, 5, RelationshipType::Antagonistic)));
        assert!(!filter.matches(&rel(1, 3, RelationshipType::Beneficial)));
    }

    #[test]
    fn test_classification_flags() {
        let beneficial = CompanionFilter::new().beneficial_only();
        assert!(beneficial.matches(&rel(1, 2, RelationshipType::Beneficial)));
        assert!(!beneficial.matches(&rel(1, 2, RelationshipType::Antagonistic)));

        let no_neutral = CompanionFilter::new().excluding_neutral();
        assert!(no_neutral.matches(&rel(1, 2, RelationshipType::Antagonistic)));
        assert!(!no_neutral.matches(&rel(1, 2, RelationshipType::Neutral)));

        let contradictory = CompanionFilter::new()
            .with_relationship(RelationshipType::Neutral)
            .beneficial_only();
        assert!(!contradictory.matches(&rel(1, 2, RelationshipType::Neutral)));
        assert!(!contradictory.matches(&rel(1, 2, RelationshipType::Beneficial)));
    }

    #[test]
    fn test_predicates_mirror_matches() {
        let filter = CompanionFilter::for_plant(PlantId::new(4).unwrap()).excluding_neutral();
        let predicates = filter.predicates();
        assert_eq!(predicates.len(), 2);
        assert_eq!(
            predicates[1],
            Predicate::OneOf {
                column: Column::RelationshipType,
                values: vec!["beneficial".into(), "antagonistic".into()],
            }
        );
        assert!(CompanionFilter::new().predicates().is_empty());
    }
}

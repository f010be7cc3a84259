//! Relational store seam
//!
//! The engine talks to its system of record only through `CatalogStore`.
//! Reads take compiled predicates; writes take validated entities. Every call
//! made by the engine goes through `bounded`, so a hung store surfaces as
//! `CatalogError::Timeout` instead of blocking a request forever.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};
use crate::filter::SortDirection;
use crate::model::{
    CompanionRelationship, GrowingConditions, Language, LocalizedName, NewCompanionRelationship,
    NewPlant, PhysicalCharacteristics, Plant, PlantId, PlantUpdate, RelationshipId,
};
use crate::predicate::{CompiledFilter, Predicate};

/// Column a plant query is ordered by; plant id always breaks ties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Ascending id is creation order
    Id,
    BotanicalName,
}

/// Exclusive keyset lower bound: the sort value and id of the last row already seen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyset {
    #[serde(default)]
    pub value: Option<String>,
    pub id: PlantId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlantQuery {
    pub filter: CompiledFilter,
    pub sort: SortKey,
    pub direction: SortDirection,
    pub after: Option<Keyset>,
    pub limit: usize,
}

impl PlantQuery {
    pub fn new(filter: CompiledFilter, limit: usize) -> Self {
        Self {
            filter,
            sort: SortKey::Id,
            direction: SortDirection::Asc,
            after: None,
            limit,
        }
    }

    pub fn sorted_by(mut self, sort: SortKey, direction: SortDirection) -> Self {
        self.sort = sort;
        self.direction = direction;
        self
    }

    pub fn after(mut self, keyset: Option<Keyset>) -> Self {
        self.after = keyset;
        self
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Plants with the given ids, ascending by id; unknown ids are skipped
    async fn plants_by_ids(&self, ids: &[PlantId]) -> CatalogResult<Vec<Plant>>;

    /// At most `query.limit` plants matching the filter, in the requested order
    async fn query_plants(&self, query: &PlantQuery) -> CatalogResult<Vec<Plant>>;

    async fn count_plants(&self, filter: &CompiledFilter) -> CatalogResult<u64>;

    /// Name rows for all `ids` in one language: rows for `country` plus
    /// country-less rows, or only country-less rows when `country` is `None`
    async fn names_for(
        &self,
        ids: &[PlantId],
        language: &str,
        country: Option<&str>,
    ) -> CatalogResult<Vec<LocalizedName>>;

    /// Assertions for `country` plus country-less ones, country-specific first
    async fn growing_conditions(
        &self,
        plant_id: PlantId,
        country: Option<&str>,
    ) -> CatalogResult<Vec<GrowingConditions>>;

    async fn physical_characteristics(
        &self,
        plant_id: PlantId,
    ) -> CatalogResult<Option<PhysicalCharacteristics>>;

    /// Relationships matching every predicate, ascending by id
    async fn companions(&self, predicates: &[Predicate])
        -> CatalogResult<Vec<CompanionRelationship>>;

    async fn languages(&self) -> CatalogResult<Vec<Language>>;

    /// Distinct (family, genus) pairs currently in the catalog
    async fn taxonomy(&self) -> CatalogResult<Vec<(String, String)>>;

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    async fn insert_plant(&self, plant: &NewPlant) -> CatalogResult<Plant>;

    /// `None` when the plant does not exist
    async fn update_plant(&self, id: PlantId, update: &PlantUpdate)
        -> CatalogResult<Option<Plant>>;

    /// Removes the plant with every dependent row; false when it did not exist
    async fn delete_plant(&self, id: PlantId) -> CatalogResult<bool>;

    /// All-or-nothing bulk insert
    async fn insert_names(&self, names: &[LocalizedName]) -> CatalogResult<usize>;

    /// Replaces every assertion recorded for the plant
    async fn replace_growing_conditions(
        &self,
        plant_id: PlantId,
        conditions: &[GrowingConditions],
    ) -> CatalogResult<()>;

    async fn upsert_physical_characteristics(
        &self,
        physical: &PhysicalCharacteristics,
    ) -> CatalogResult<()>;

    async fn insert_companion(
        &self,
        relationship: &NewCompanionRelationship,
    ) -> CatalogResult<CompanionRelationship>;

    /// False when no relationship had that id
    async fn delete_companion(&self, id: RelationshipId) -> CatalogResult<bool>;

    async fn upsert_language(&self, language: &Language) -> CatalogResult<()>;
}

/// Run one store call under a deadline
pub async fn bounded<T, F>(timeout: Duration, call: F) -> CatalogResult<T>
where
    F: Future<Output = CatalogResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("Catalog store call exceeded {:?}", timeout);
            Err(CatalogError::Timeout {
                dependency: "catalog store",
                after: timeout,
            })
        }
    }
}

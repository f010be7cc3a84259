//! Plant Catalog Query Engine
//!
//! Localized search, filtering and caching over a horticultural catalog.
//!
//! Layout, leaf first:
//! - `model`, `filter`, `error`, `config`: catalog types, filters and settings
//! - `predicate`: typed predicates compiled from filters
//! - `store` / `query_engine`: the relational store trait and its DataFusion implementation
//! - `localization`, `batch_loader`: name fallback and grouped name loads
//! - `search`: text + filter search with keyset pagination
//! - `companion`: companion relationship filter
//! - `cache`: read-through cache with per-class TTLs and write invalidation
//! - `lookup`: refreshable language and taxonomy snapshot
//! - `catalog`: the engine API tying it all together
//! - `seed`: JSON catalog loading

pub mod batch_loader;
pub mod cache;
pub mod catalog;
pub mod companion;
pub mod config;
pub mod error;
pub mod filter;
pub mod localization;
pub mod lookup;
pub mod model;
pub mod predicate;
pub mod query_engine;
pub mod search;
pub mod seed;
pub mod store;

// Re-export commonly used types
pub use cache::{CacheBackend, CacheStats, MokaBackend, NoopBackend};
pub use catalog::PlantCatalog;
pub use companion::CompanionFilter;
pub use config::CatalogConfig;
pub use error::{CatalogError, CatalogResult};
pub use filter::{GrowingConditionsFilter, SearchFilter, SortDirection, SortField};
pub use model::{
    Companion, CompanionRelationship, Confidence, GrowingConditions, Language, LocalizedName,
    Locale, NewCompanionRelationship, NewPlant, PhysicalCharacteristics, Plant, PlantId,
    PlantTrait, PlantUpdate, RelationshipId, RelationshipType,
};
pub use query_engine::{QueryCounts, QueryEngine};
pub use search::SearchPage;
pub use seed::{CatalogSeed, SeedReport};
pub use store::CatalogStore;

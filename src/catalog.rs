//! Catalog engine API
//!
//! `PlantCatalog` is what an API layer talks to. Every read goes through the
//! read-through cache, keyed per operation class; every write goes to the
//! store and then removes whatever cached answers it could have changed.
//! Cache trouble never reaches the caller. Store trouble always does.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::batch_loader::BatchLoader;
use crate::cache::{CacheBackend, CacheKey, CacheStats, Invalidation, MokaBackend, ReadThrough};
use crate::companion::CompanionFilter;
use crate::config::CatalogConfig;
use crate::error::{CatalogError, CatalogResult};
use crate::filter::{GrowingConditionsFilter, SearchFilter};
use crate::localization::LocalizationResolver;
use crate::lookup::{LookupCache, LookupSnapshot};
use crate::model::{
    Companion, CompanionRelationship, GrowingConditions, Language, LocalizedName, Locale,
    NewCompanionRelationship, NewPlant, PhysicalCharacteristics, Plant, PlantId, PlantUpdate,
    RelationshipId,
};
use crate::predicate::{Column, CompiledFilter, Predicate};
use crate::search::{SearchComposer, SearchPage};
use crate::store::{bounded, CatalogStore};

#[derive(Clone)]
pub struct PlantCatalog {
    store: Arc<dyn CatalogStore>,
    cache: ReadThrough,
    loader: BatchLoader,
    resolver: LocalizationResolver,
    composer: SearchComposer,
    lookups: Arc<LookupCache>,
    config: Arc<CatalogConfig>,
}

impl PlantCatalog {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        backend: Arc<dyn CacheBackend>,
        config: CatalogConfig,
    ) -> Self {
        let config = Arc::new(config);
        let loader = BatchLoader::new(
            store.clone(),
            config.default_language.clone(),
            config.store_timeout(),
        );
        Self {
            cache: ReadThrough::new(backend, config.clone()),
            resolver: LocalizationResolver::new(loader.clone()),
            composer: SearchComposer::new(store.clone(), loader.clone(), config.clone()),
            lookups: Arc::new(LookupCache::new(config.lookup_ttl())),
            loader,
            store,
            config,
        }
    }

    /// Catalog backed by an in-process moka cache sized from `config`
    pub fn with_memory_cache(store: Arc<dyn CatalogStore>, config: CatalogConfig) -> Self {
        let backend = Arc::new(MokaBackend::new(config.cache_capacity));
        Self::new(store, backend, config)
    }

    /// Share a lookup snapshot owner with other catalogs over the same store
    pub fn with_lookups(mut self, lookups: Arc<LookupCache>) -> Self {
        self.lookups = lookups;
        self
    }

    /// Read through the cache of `other`, sharing its backend and its
    /// invalidation epoch
    ///
    /// Catalogs that share one backend must share the read-through layer as
    /// well: a write on either then stops a fetch in flight on the other from
    /// writing back a result the write made stale.
    pub fn with_cache_of(mut self, other: &PlantCatalog) -> Self {
        self.cache = other.cache.clone();
        self
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn find_by_id(&self, id: PlantId, locale: &Locale) -> CatalogResult<Plant> {
        self.cache
            .get_or_fetch(&CacheKey::plant(id, locale), || async move {
                let mut plants = bounded(self.config.store_timeout(), self.store.plants_by_ids(&[id]))
                    .await?;
                if plants.is_empty() {
                    return Err(CatalogError::not_found("plant", id));
                }
                self.loader.attach_names(&mut plants, locale).await?;
                Ok(plants.remove(0))
            })
            .await
    }

    /// Plants in request order; unknown ids are left out
    pub async fn find_by_ids(&self, ids: &[PlantId], locale: &Locale) -> CatalogResult<Vec<Plant>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let key = CacheKey::plant_batch(ids, locale)?;
        let found: Vec<Plant> = self
            .cache
            .get_or_fetch(&key, || async move {
                let mut plants =
                    bounded(self.config.store_timeout(), self.store.plants_by_ids(ids)).await?;
                self.loader.attach_names(&mut plants, locale).await?;
                Ok(plants)
            })
            .await?;

        let mut seen = BTreeSet::new();
        Ok(ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| found.iter().find(|p| p.id == *id).cloned())
            .collect())
    }

    pub async fn resolve_names(&self, id: PlantId, locale: &Locale) -> CatalogResult<Vec<String>> {
        self.cache
            .get_or_fetch(&CacheKey::names(id, locale), || {
                self.resolver.resolve_names(id, locale)
            })
            .await
    }

    pub async fn search(
        &self,
        text: Option<&str>,
        filter: &SearchFilter,
        locale: &Locale,
    ) -> CatalogResult<SearchPage> {
        // invalid filters fail before the key is derived
        filter.validate()?;
        let key = CacheKey::search(text, filter, locale)?;
        self.cache
            .get_or_fetch(&key, || self.composer.search(text, filter, locale))
            .await
    }

    pub async fn count(&self, text: Option<&str>, filter: &SearchFilter) -> CatalogResult<u64> {
        filter.validate()?;
        let key = CacheKey::count(text, filter)?;
        self.cache
            .get_or_fetch(&key, || self.composer.count(text, filter))
            .await
    }

    /// Plants with at least one assertion satisfying every condition, paged in id order
    pub async fn find_by_growing_conditions(
        &self,
        filter: &GrowingConditionsFilter,
        locale: &Locale,
    ) -> CatalogResult<SearchPage> {
        filter.validate()?;
        let key = CacheKey::condition_search(filter, locale)?;
        self.cache
            .get_or_fetch(&key, || self.composer.search_conditions(filter, locale))
            .await
    }

    /// Assertions for the locale's country followed by country-agnostic ones
    pub async fn get_growing_conditions(
        &self,
        id: PlantId,
        locale: &Locale,
    ) -> CatalogResult<Vec<GrowingConditions>> {
        let country = locale.country.as_deref();
        self.cache
            .get_or_fetch(&CacheKey::growing_conditions(id, country), || {
                bounded(
                    self.config.store_timeout(),
                    self.store.growing_conditions(id, country),
                )
            })
            .await
    }

    pub async fn get_physical_characteristics(
        &self,
        id: PlantId,
    ) -> CatalogResult<Option<PhysicalCharacteristics>> {
        self.cache
            .get_or_fetch_optional(&CacheKey::physical(id), || {
                bounded(
                    self.config.store_timeout(),
                    self.store.physical_characteristics(id),
                )
            })
            .await
    }

    /// Companions of `id` passing `filter`, each with its partner plant
    ///
    /// The full list is cached per plant and locale; the filter is applied
    /// afterwards so one entry serves every filter.
    pub async fn get_companions(
        &self,
        id: PlantId,
        filter: &CompanionFilter,
        locale: &Locale,
    ) -> CatalogResult<Vec<Companion>> {
        let all: Vec<Companion> = self
            .cache
            .get_or_fetch(&CacheKey::companions(id, locale), || {
                self.load_companions(id, locale)
            })
            .await?;
        Ok(all
            .into_iter()
            .filter(|c| filter.matches(&c.relationship))
            .collect())
    }

    async fn load_companions(&self, id: PlantId, locale: &Locale) -> CatalogResult<Vec<Companion>> {
        let timeout = self.config.store_timeout();
        let predicates = CompanionFilter::for_plant(id).predicates();
        let relationships = bounded(timeout, self.store.companions(&predicates)).await?;
        if relationships.is_empty() {
            return Ok(Vec::new());
        }

        let partner_ids: Vec<PlantId> = relationships.iter().filter_map(|r| r.other(id)).collect();
        let mut partners = bounded(timeout, self.store.plants_by_ids(&partner_ids)).await?;
        self.loader.attach_names(&mut partners, locale).await?;

        Ok(relationships
            .into_iter()
            .filter_map(|relationship| {
                let partner = relationship.other(id)?;
                let plant = partners.iter().find(|p| p.id == partner)?.clone();
                Some(Companion { relationship, plant })
            })
            .collect())
    }

    pub async fn lookups(&self) -> CatalogResult<Arc<LookupSnapshot>> {
        self.lookups
            .current(self.store.as_ref(), self.config.store_timeout())
            .await
    }

    pub async fn refresh_lookups(&self) -> CatalogResult<Arc<LookupSnapshot>> {
        self.lookups
            .refresh(self.store.as_ref(), self.config.store_timeout())
            .await
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub async fn create_plant(&self, plant: &NewPlant) -> CatalogResult<Plant> {
        let plant = plant.normalized()?;
        self.lookups().await?.check_taxonomy(&plant.family, &plant.genus)?;

        let created = bounded(self.config.store_timeout(), self.store.insert_plant(&plant)).await?;
        self.cache.invalidate(&Invalidation::plant_created(created.id)).await;
        self.lookups.invalidate();
        tracing::info!("Created plant {} ({})", created.id, created.botanical_name);
        Ok(created)
    }

    pub async fn update_plant(&self, id: PlantId, update: &PlantUpdate) -> CatalogResult<Plant> {
        let timeout = self.config.store_timeout();
        if update.family.is_some() || update.genus.is_some() {
            let original = bounded(timeout, self.store.plants_by_ids(&[id]))
                .await?
                .pop()
                .ok_or_else(|| CatalogError::not_found("plant", id))?;
            let mut current = original.clone();
            update.apply(&mut current, original.updated_at)?;
            if let Err(conflict) = self.lookups().await?.check_taxonomy(&current.family, &current.genus) {
                // the plant itself does not pin its genus to the old family
                let holders = CompiledFilter {
                    plant: vec![Predicate::Equals {
                        column: Column::Genus,
                        value: current.genus.clone(),
                    }],
                    conditions: Vec::new(),
                };
                let holding = bounded(timeout, self.store.count_plants(&holders)).await?;
                let own = u64::from(original.genus.eq_ignore_ascii_case(&current.genus));
                if holding > own {
                    return Err(conflict);
                }
            }
        }

        let updated = bounded(timeout, self.store.update_plant(id, update))
            .await?
            .ok_or_else(|| CatalogError::not_found("plant", id))?;
        self.cache.invalidate(&Invalidation::plant_updated(id)).await;
        self.lookups.invalidate();
        tracing::info!("Updated plant {} ({})", id, updated.botanical_name);
        Ok(updated)
    }

    pub async fn delete_plant(&self, id: PlantId) -> CatalogResult<()> {
        if !bounded(self.config.store_timeout(), self.store.delete_plant(id)).await? {
            return Err(CatalogError::not_found("plant", id));
        }
        self.cache.invalidate(&Invalidation::plant_deleted(id)).await;
        self.lookups.invalidate();
        tracing::info!("Deleted plant {}", id);
        Ok(())
    }

    /// Insert a batch of names; one bad row rejects the whole batch
    pub async fn add_localized_names(&self, names: &[LocalizedName]) -> CatalogResult<usize> {
        let names = names
            .iter()
            .map(LocalizedName::normalized)
            .collect::<CatalogResult<Vec<_>>>()?;
        let lookups = self.lookups().await?;
        for name in &names {
            lookups.check_language(&name.language)?;
        }

        let inserted = bounded(self.config.store_timeout(), self.store.insert_names(&names)).await?;
        let plants: BTreeSet<PlantId> = names.iter().map(|n| n.plant_id).collect();
        for id in &plants {
            self.cache.invalidate(&Invalidation::names_changed(*id)).await;
        }
        tracing::info!("Added {} localized names across {} plants", inserted, plants.len());
        Ok(inserted)
    }

    /// Replace every growing-condition assertion recorded for `id`
    pub async fn set_growing_conditions(
        &self,
        id: PlantId,
        conditions: &[GrowingConditions],
    ) -> CatalogResult<()> {
        let conditions = conditions
            .iter()
            .map(GrowingConditions::normalized)
            .collect::<CatalogResult<Vec<_>>>()?;
        bounded(
            self.config.store_timeout(),
            self.store.replace_growing_conditions(id, &conditions),
        )
        .await?;
        self.cache.invalidate(&Invalidation::conditions_changed(id)).await;
        tracing::info!("Recorded {} growing-condition assertions for plant {}", conditions.len(), id);
        Ok(())
    }

    pub async fn set_physical_characteristics(
        &self,
        physical: &PhysicalCharacteristics,
    ) -> CatalogResult<()> {
        physical.validate()?;
        bounded(
            self.config.store_timeout(),
            self.store.upsert_physical_characteristics(physical),
        )
        .await?;
        self.cache
            .invalidate(&Invalidation::physical_changed(physical.plant_id))
            .await;
        tracing::info!("Recorded physical characteristics for plant {}", physical.plant_id);
        Ok(())
    }

    pub async fn create_companion_relationship(
        &self,
        relationship: &NewCompanionRelationship,
    ) -> CatalogResult<CompanionRelationship> {
        let relationship = relationship.normalized()?;
        let created = bounded(
            self.config.store_timeout(),
            self.store.insert_companion(&relationship),
        )
        .await?;
        self.cache
            .invalidate(&Invalidation::companion_created(created.plant_a, created.plant_b))
            .await;
        tracing::info!(
            "Created {} relationship {} between plants {} and {}",
            created.relationship.as_str(),
            created.id,
            created.plant_a,
            created.plant_b
        );
        Ok(created)
    }

    /// The endpoints are not resolved first, so every companion list is dropped
    pub async fn delete_companion_relationship(&self, id: RelationshipId) -> CatalogResult<()> {
        if !bounded(self.config.store_timeout(), self.store.delete_companion(id)).await? {
            return Err(CatalogError::not_found("companion relationship", id));
        }
        self.cache.invalidate(&Invalidation::companion_deleted()).await;
        tracing::info!("Deleted companion relationship {}", id);
        Ok(())
    }

    pub async fn add_language(&self, language: &Language) -> CatalogResult<()> {
        let language = Language::new(&language.code, &language.name)?;
        bounded(self.config.store_timeout(), self.store.upsert_language(&language)).await?;
        self.lookups.invalidate();
        tracing::info!("Registered language {} ({})", language.code, language.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopBackend;
    use crate::model::{RelationshipType, PlantTrait};
    use crate::query_engine::QueryEngine;

    fn config() -> CatalogConfig {
        CatalogConfig::default().with_background_populate(false)
    }

    async fn catalog() -> (Arc<QueryEngine>, PlantCatalog) {
        let engine = Arc::new(QueryEngine::new().unwrap());
        let catalog = PlantCatalog::with_memory_cache(engine.clone(), config());
        catalog.add_language(&Language::new("en", "English").unwrap()).await.unwrap();
        (engine, catalog)
    }

    fn en() -> Locale {
        Locale::new("en", None).unwrap()
    }

    #[tokio::test]
    async fn test_find_by_id_caches_hits_but_not_misses() {
        let (engine, catalog) = catalog().await;
        let rose = catalog
            .create_plant(&NewPlant::new("Rosaceae", "Rosa", "canina"))
            .await
            .unwrap();

        catalog.find_by_id(rose.id, &en()).await.unwrap();
        let before = engine.stats().queries;
        catalog.find_by_id(rose.id, &en()).await.unwrap();
        assert_eq!(engine.stats().queries, before);

        let missing = PlantId::new(999).unwrap();
        assert!(catalog.find_by_id(missing, &en()).await.unwrap_err().is_not_found());
        let before = engine.stats().queries;
        assert!(catalog.find_by_id(missing, &en()).await.unwrap_err().is_not_found());
        assert!(engine.stats().queries > before);
    }

    #[tokio::test]
    async fn test_find_by_ids_keeps_request_order() {
        let (_, catalog) = catalog().await;
        let a = catalog.create_plant(&NewPlant::new("Rosaceae", "Rosa", "canina")).await.unwrap();
        let b = catalog.create_plant(&NewPlant::new("Lamiaceae", "Salvia", "rosmarinus")).await.unwrap();
        let missing = PlantId::new(77).unwrap();

        let found = catalog.find_by_ids(&[b.id, missing, a.id, b.id], &en()).await.unwrap();
        let ids: Vec<PlantId> = found.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);

        // a different order of the same set reuses the cached batch
        let found = catalog.find_by_ids(&[a.id, missing, b.id], &en()).await.unwrap();
        let ids: Vec<PlantId> = found.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert_eq!(catalog.cache_stats().hits, 1);

        // a smaller set is a different batch
        catalog.find_by_ids(&[a.id, b.id], &en()).await.unwrap();
        assert_eq!(catalog.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn test_update_refreshes_cached_plant() {
        let (_, catalog) = catalog().await;
        let rose = catalog.create_plant(&NewPlant::new("Rosaceae", "Rosa", "canina")).await.unwrap();
        catalog.find_by_id(rose.id, &en()).await.unwrap();

        let update = PlantUpdate {
            cultivar: Some(Some("Kew".into())),
            ..PlantUpdate::default()
        };
        catalog.update_plant(rose.id, &update).await.unwrap();
        let fetched = catalog.find_by_id(rose.id, &en()).await.unwrap();
        assert_eq!(fetched.botanical_name, "Rosa canina 'Kew'");
    }

    #[tokio::test]
    async fn test_genus_cannot_change_family() {
        let (_, catalog) = catalog().await;
        catalog.create_plant(&NewPlant::new("Rosaceae", "Rosa", "canina")).await.unwrap();
        let err = catalog
            .create_plant(&NewPlant::new("Lamiaceae", "Rosa", "gallica"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_sole_genus_member_can_change_family() {
        let (_, catalog) = catalog().await;
        let rose = catalog.create_plant(&NewPlant::new("Rosaceae", "Rosa", "canina")).await.unwrap();
        let update = PlantUpdate {
            family: Some("Lamiaceae".into()),
            ..PlantUpdate::default()
        };
        let moved = catalog.update_plant(rose.id, &update).await.unwrap();
        assert_eq!(moved.family, "Lamiaceae");

        // the genus now follows the new family
        let err = catalog
            .create_plant(&NewPlant::new("Rosaceae", "Rosa", "gallica"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_shared_genus_keeps_family_on_update() {
        let (_, catalog) = catalog().await;
        let canina = catalog.create_plant(&NewPlant::new("Rosaceae", "Rosa", "canina")).await.unwrap();
        catalog.create_plant(&NewPlant::new("Rosaceae", "Rosa", "gallica")).await.unwrap();
        let update = PlantUpdate {
            family: Some("Lamiaceae".into()),
            ..PlantUpdate::default()
        };
        let err = catalog.update_plant(canina.id, &update).await.unwrap_err();
        assert!(err.is_validation());
        let unchanged = catalog.find_by_id(canina.id, &en()).await.unwrap();
        assert_eq!(unchanged.family, "Rosaceae");
    }

    #[tokio::test]
    async fn test_unknown_language_rejected() {
        let (_, catalog) = catalog().await;
        let rose = catalog.create_plant(&NewPlant::new("Rosaceae", "Rosa", "canina")).await.unwrap();
        let err = catalog
            .add_localized_names(&[LocalizedName::new(rose.id, "de", None, "Hunds-Rose")])
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_companion_delete_drops_every_list() {
        let (_, catalog) = catalog().await;
        let a = catalog.create_plant(&NewPlant::new("Solanaceae", "Solanum", "lycopersicum")).await.unwrap();
        let b = catalog.create_plant(&NewPlant::new("Lamiaceae", "Ocimum", "basilicum")).await.unwrap();
        let rel = catalog
            .create_companion_relationship(&NewCompanionRelationship::new(
                a.id,
                b.id,
                RelationshipType::Beneficial,
            ))
            .await
            .unwrap();
        let filter = CompanionFilter::new();
        assert_eq!(catalog.get_companions(a.id, &filter, &en()).await.unwrap().len(), 1);

        catalog.delete_companion_relationship(rel.id).await.unwrap();
        assert!(catalog.get_companions(a.id, &filter, &en()).await.unwrap().is_empty());
        assert!(catalog
            .delete_companion_relationship(rel.id)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_physical_write_reaches_search() {
        let engine = Arc::new(QueryEngine::new().unwrap());
        let catalog = PlantCatalog::new(engine, Arc::new(NoopBackend), config());
        let holly = catalog.create_plant(&NewPlant::new("Aquifoliaceae", "Ilex", "aquifolium")).await.unwrap();
        let filter = SearchFilter::new().with_trait(PlantTrait::Evergreen, true);
        assert_eq!(catalog.count(None, &filter).await.unwrap(), 0);

        catalog
            .set_physical_characteristics(
                &PhysicalCharacteristics::new(holly.id).with_trait(PlantTrait::Evergreen, true),
            )
            .await
            .unwrap();
        assert_eq!(catalog.count(None, &filter).await.unwrap(), 1);
        assert!(catalog.get_physical_characteristics(holly.id).await.unwrap().is_some());
    }
}

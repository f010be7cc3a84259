// DataFusion catalog store
//
// Rows held in memory are the system of record. Every write stages a copy of
// the rows, rebuilds the Arrow tables it touched and swaps in a fresh
// SessionContext. Readers clone the current context and run against that
// snapshot, so a query never observes a half-applied write.
//
// Tables:
//   - plants:             one row per plant, denormalized with physical
//                         characteristics and a common-name corpus (all languages)
//   - localized_names:    one row per (plant, language, country, name)
//   - growing_conditions: one row per assertion; list columns encoded as ",a,b,"
//   - companions:         one row per relationship, plant_a < plant_b
//   - languages:          reference table

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::arrow::json::{ArrayWriter, ReaderBuilder};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::JoinType;
use datafusion::datasource::MemTable;
use datafusion::prelude::*;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};
use crate::filter::SortDirection;
use crate::model::{
    CompanionRelationship, Confidence, GrowingConditions, Language, LocalizedName,
    NewCompanionRelationship, NewPlant, PhysicalCharacteristics, Plant, PlantId, PlantTrait,
    PlantUpdate, RelationshipId, RelationshipType,
};
use crate::predicate::{
    conjunction, decode_list, encode_list, trait_column, Column, CompiledFilter, Predicate,
};
use crate::store::{CatalogStore, Keyset, PlantQuery, SortKey};

const PLANTS: &str = "plants";
const NAMES: &str = "localized_names";
const CONDITIONS: &str = "growing_conditions";
const COMPANIONS: &str = "companions";
const LANGUAGES: &str = "languages";

const BATCH_SIZE: usize = 1024;
const CORPUS_SEPARATOR: &str = "\n";

// ============================================================================
// Query accounting
// ============================================================================

/// Counts read queries issued against the store
#[derive(Debug, Default)]
pub struct QueryStats {
    queries: AtomicU64,
    name_queries: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryCounts {
    pub queries: u64,
    pub name_queries: u64,
}

impl QueryStats {
    fn record(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_names(&self) {
        self.record();
        self.name_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueryCounts {
        QueryCounts {
            queries: self.queries.load(Ordering::Relaxed),
            name_queries: self.name_queries.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Rows (system of record)
// ============================================================================

#[derive(Debug, Clone, Default)]
struct CatalogRows {
    plants: BTreeMap<PlantId, Plant>,
    names: Vec<LocalizedName>,
    conditions: BTreeMap<PlantId, Vec<GrowingConditions>>,
    physical: BTreeMap<PlantId, PhysicalCharacteristics>,
    companions: BTreeMap<RelationshipId, CompanionRelationship>,
    languages: BTreeMap<String, Language>,
    last_plant_id: i64,
    last_relationship_id: i64,
}

impl CatalogRows {
    fn require_plant(&self, id: PlantId) -> CatalogResult<()> {
        if self.plants.contains_key(&id) {
            Ok(())
        } else {
            Err(CatalogError::not_found("plant", id))
        }
    }

    fn next_plant_id(&mut self) -> CatalogResult<PlantId> {
        self.last_plant_id += 1;
        PlantId::new(self.last_plant_id)
    }

    fn next_relationship_id(&mut self) -> CatalogResult<RelationshipId> {
        self.last_relationship_id += 1;
        RelationshipId::new(self.last_relationship_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Table {
    Plants,
    Names,
    Conditions,
    Companions,
    Languages,
}

impl Table {
    const ALL: [Table; 5] = [
        Table::Plants,
        Table::Names,
        Table::Conditions,
        Table::Companions,
        Table::Languages,
    ];

    fn name(self) -> &'static str {
        match self {
            Table::Plants => PLANTS,
            Table::Names => NAMES,
            Table::Conditions => CONDITIONS,
            Table::Companions => COMPANIONS,
            Table::Languages => LANGUAGES,
        }
    }

    fn build(self, rows: &CatalogRows) -> CatalogResult<Arc<MemTable>> {
        match self {
            Table::Plants => mem_table(plants_schema(), &plant_rows(rows)),
            Table::Names => mem_table(names_schema(), &rows.names),
            Table::Conditions => {
                let encoded: Vec<ConditionRow> = rows
                    .conditions
                    .values()
                    .flat_map(|list| list.iter().enumerate())
                    .map(|(position, c)| ConditionRow::from_record(c, position))
                    .collect();
                mem_table(conditions_schema(), &encoded)
            }
            Table::Companions => {
                let encoded: Vec<CompanionRow> =
                    rows.companions.values().map(CompanionRow::from_record).collect();
                mem_table(companions_schema(), &encoded)
            }
            Table::Languages => {
                let languages: Vec<&Language> = rows.languages.values().collect();
                mem_table(languages_schema(), &languages)
            }
        }
    }
}

/// Consistent pair of rows and the query context built from them
struct Snapshot {
    rows: CatalogRows,
    tables: BTreeMap<Table, Arc<MemTable>>,
    ctx: Arc<SessionContext>,
}

impl Snapshot {
    fn build(rows: CatalogRows) -> CatalogResult<Self> {
        let mut tables = BTreeMap::new();
        for table in Table::ALL {
            tables.insert(table, table.build(&rows)?);
        }
        let ctx = Arc::new(session(&tables)?);
        Ok(Self { rows, tables, ctx })
    }

    /// Snapshot over `rows` reusing every table not listed in `touched`
    fn rebuilt(&self, rows: CatalogRows, touched: &[Table]) -> CatalogResult<Self> {
        let mut tables = self.tables.clone();
        for table in touched {
            tables.insert(*table, table.build(&rows)?);
        }
        let ctx = Arc::new(session(&tables)?);
        Ok(Self { rows, tables, ctx })
    }
}

fn session(tables: &BTreeMap<Table, Arc<MemTable>>) -> CatalogResult<SessionContext> {
    let ctx = SessionContext::new();
    for (table, provider) in tables {
        ctx.register_table(table.name(), provider.clone())?;
    }
    Ok(ctx)
}

// ============================================================================
// Engine
// ============================================================================

pub struct QueryEngine {
    snapshot: RwLock<Snapshot>,
    stats: QueryStats,
}

impl QueryEngine {
    /// Empty catalog with all tables registered
    pub fn new() -> CatalogResult<Self> {
        Ok(Self {
            snapshot: RwLock::new(Snapshot::build(CatalogRows::default())?),
            stats: QueryStats::default(),
        })
    }

    pub fn stats(&self) -> QueryCounts {
        self.stats.snapshot()
    }

    fn context(&self) -> CatalogResult<Arc<SessionContext>> {
        let guard = self
            .snapshot
            .read()
            .map_err(|_| CatalogError::Store("catalog snapshot lock poisoned".into()))?;
        Ok(guard.ctx.clone())
    }

    /// Apply `change` to a staged copy of the rows, then publish it together
    /// with the rebuilt tables. Nothing is published if either step fails.
    fn write<T>(
        &self,
        touched: &[Table],
        change: impl FnOnce(&mut CatalogRows) -> CatalogResult<T>,
    ) -> CatalogResult<T> {
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| CatalogError::Store("catalog snapshot lock poisoned".into()))?;
        let mut staged = guard.rows.clone();
        let out = change(&mut staged)?;
        let next = guard.rebuilt(staged, touched)?;
        *guard = next;
        Ok(out)
    }

    async fn filtered_plants(
        &self,
        ctx: &SessionContext,
        filter: &CompiledFilter,
    ) -> CatalogResult<DataFrame> {
        let mut df = ctx.table(PLANTS).await?;
        if let Some(expr) = conjunction(&filter.plant) {
            df = df.filter(expr)?;
        }
        // A plant matches when any single assertion satisfies every condition predicate
        if let Some(expr) = conjunction(&filter.conditions) {
            let matching = ctx
                .table(CONDITIONS)
                .await?
                .filter(expr)?
                .select(vec![col("plant_id").alias("condition_plant_id")])?;
            df = df.join(
                matching,
                JoinType::LeftSemi,
                &["plant_id"],
                &["condition_plant_id"],
                None,
            )?;
        }
        Ok(df)
    }
}

fn keyset_expr(sort: SortKey, direction: SortDirection, keyset: &Keyset) -> Expr {
    let id = lit(keyset.id.get());
    let after = |column: Expr, value: Expr| match direction {
        SortDirection::Asc => column.gt(value),
        SortDirection::Desc => column.lt(value),
    };
    match (sort, &keyset.value) {
        (SortKey::BotanicalName, Some(value)) => {
            let value = lit(value.clone());
            after(col("botanical_name"), value.clone())
                .or(col("botanical_name").eq(value).and(after(col("plant_id"), id)))
        }
        _ => after(col("plant_id"), id),
    }
}

#[async_trait]
impl CatalogStore for QueryEngine {
    async fn plants_by_ids(&self, ids: &[PlantId]) -> CatalogResult<Vec<Plant>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.stats.record();
        let ctx = self.context()?;
        let batches = ctx
            .table(PLANTS)
            .await?
            .filter(col("plant_id").in_list(id_literals(ids), false))?
            .sort(vec![col("plant_id").sort(true, false)])?
            .collect()
            .await?;
        rows_from_batches::<PlantRow>(&batches)?
            .into_iter()
            .map(PlantRow::into_plant)
            .collect()
    }

    async fn query_plants(&self, query: &PlantQuery) -> CatalogResult<Vec<Plant>> {
        self.stats.record();
        let ctx = self.context()?;
        let mut df = self.filtered_plants(&ctx, &query.filter).await?;

        if let Some(keyset) = &query.after {
            df = df.filter(keyset_expr(query.sort, query.direction, keyset))?;
        }

        let asc = query.direction == SortDirection::Asc;
        let mut order = Vec::new();
        if query.sort == SortKey::BotanicalName {
            order.push(col("botanical_name").sort(asc, false));
        }
        order.push(col("plant_id").sort(asc, false));

        let batches = df
            .sort(order)?
            .limit(0, Some(query.limit))?
            .collect()
            .await?;
        rows_from_batches::<PlantRow>(&batches)?
            .into_iter()
            .map(PlantRow::into_plant)
            .collect()
    }

    async fn count_plants(&self, filter: &CompiledFilter) -> CatalogResult<u64> {
        self.stats.record();
        let ctx = self.context()?;
        let count = self.filtered_plants(&ctx, filter).await?.count().await?;
        Ok(count as u64)
    }

    async fn names_for(
        &self,
        ids: &[PlantId],
        language: &str,
        country: Option<&str>,
    ) -> CatalogResult<Vec<LocalizedName>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.stats.record_names();
        let ctx = self.context()?;
        let scope = match country {
            Some(country) => col("country")
                .eq(lit(country.to_string()))
                .or(col("country").is_null()),
            None => col("country").is_null(),
        };
        let batches = ctx
            .table(NAMES)
            .await?
            .filter(
                col("plant_id")
                    .in_list(id_literals(ids), false)
                    .and(col("language").eq(lit(language.to_string())))
                    .and(scope),
            )?
            .sort(vec![
                col("plant_id").sort(true, false),
                col("name").sort(true, false),
            ])?
            .collect()
            .await?;
        rows_from_batches(&batches)
    }

    async fn growing_conditions(
        &self,
        plant_id: PlantId,
        country: Option<&str>,
    ) -> CatalogResult<Vec<GrowingConditions>> {
        self.stats.record();
        let ctx = self.context()?;
        let scope = match country {
            Some(country) => Predicate::CountryOrGlobal {
                column: Column::Country,
                country: country.to_string(),
            }
            .to_expr(),
            None => col("country").is_null(),
        };
        let filter = col("plant_id").eq(lit(plant_id.get())).and(scope);
        let batches = ctx
            .table(CONDITIONS)
            .await?
            .filter(filter)?
            .sort(vec![
                // country-specific before country-agnostic
                col("country").sort(true, false),
                col("confidence_rank").sort(false, false),
                col("position").sort(true, false),
            ])?
            .collect()
            .await?;
        rows_from_batches::<ConditionRow>(&batches)?
            .into_iter()
            .map(ConditionRow::into_record)
            .collect()
    }

    async fn physical_characteristics(
        &self,
        plant_id: PlantId,
    ) -> CatalogResult<Option<PhysicalCharacteristics>> {
        self.stats.record();
        let ctx = self.context()?;
        let batches = ctx
            .table(PLANTS)
            .await?
            .filter(
                col("plant_id")
                    .eq(lit(plant_id.get()))
                    .and(col("has_physical").eq(lit(true))),
            )?
            .collect()
            .await?;
        Ok(rows_from_batches::<PlantRow>(&batches)?
            .into_iter()
            .next()
            .map(|row| row.physical()))
    }

    async fn companions(
        &self,
        predicates: &[Predicate],
    ) -> CatalogResult<Vec<CompanionRelationship>> {
        self.stats.record();
        let ctx = self.context()?;
        let mut df = ctx.table(COMPANIONS).await?;
        if let Some(expr) = conjunction(predicates) {
            df = df.filter(expr)?;
        }
        let batches = df
            .sort(vec![col("relationship_id").sort(true, false)])?
            .collect()
            .await?;
        rows_from_batches::<CompanionRow>(&batches)?
            .into_iter()
            .map(CompanionRow::into_record)
            .collect()
    }

    async fn languages(&self) -> CatalogResult<Vec<Language>> {
        self.stats.record();
        let ctx = self.context()?;
        let batches = ctx
            .table(LANGUAGES)
            .await?
            .sort(vec![col("code").sort(true, false)])?
            .collect()
            .await?;
        rows_from_batches(&batches)
    }

    async fn taxonomy(&self) -> CatalogResult<Vec<(String, String)>> {
        #[derive(Deserialize)]
        struct TaxonRow {
            family: String,
            genus: String,
        }

        self.stats.record();
        let ctx = self.context()?;
        let batches = ctx
            .table(PLANTS)
            .await?
            .select_columns(&["family", "genus"])?
            .distinct()?
            .sort(vec![
                col("family").sort(true, false),
                col("genus").sort(true, false),
            ])?
            .collect()
            .await?;
        Ok(rows_from_batches::<TaxonRow>(&batches)?
            .into_iter()
            .map(|row| (row.family, row.genus))
            .collect())
    }

    async fn insert_plant(&self, plant: &NewPlant) -> CatalogResult<Plant> {
        let plant = plant.normalized()?;
        let created = self.write(&[Table::Plants], |rows| {
            let id = rows.next_plant_id()?;
            let now = Utc::now();
            let record = Plant {
                id,
                botanical_name: plant.botanical_name(),
                family: plant.family,
                genus: plant.genus,
                species: plant.species,
                cultivar: plant.cultivar,
                plant_type: plant.plant_type,
                common_names: Vec::new(),
                created_at: now,
                updated_at: now,
            };
            rows.plants.insert(id, record.clone());
            Ok(record)
        })?;
        tracing::debug!("Inserted plant {} ({})", created.id, created.botanical_name);
        Ok(created)
    }

    async fn update_plant(
        &self,
        id: PlantId,
        update: &PlantUpdate,
    ) -> CatalogResult<Option<Plant>> {
        self.write(&[Table::Plants], |rows| {
            let Some(plant) = rows.plants.get_mut(&id) else {
                return Ok(None);
            };
            update.apply(plant, Utc::now())?;
            Ok(Some(plant.clone()))
        })
    }

    async fn delete_plant(&self, id: PlantId) -> CatalogResult<bool> {
        let touched = [Table::Plants, Table::Names, Table::Conditions, Table::Companions];
        let removed = self.write(&touched, |rows| {
            if rows.plants.remove(&id).is_none() {
                return Ok(false);
            }
            rows.names.retain(|n| n.plant_id != id);
            rows.conditions.remove(&id);
            rows.physical.remove(&id);
            rows.companions.retain(|_, rel| !rel.involves(id));
            Ok(true)
        })?;
        if removed {
            tracing::debug!("Deleted plant {} and its dependent rows", id);
        }
        Ok(removed)
    }

    async fn insert_names(&self, names: &[LocalizedName]) -> CatalogResult<usize> {
        let names = names
            .iter()
            .map(LocalizedName::normalized)
            .collect::<CatalogResult<Vec<_>>>()?;
        // The plants table carries the name corpus, so it is rebuilt too
        self.write(&[Table::Names, Table::Plants], |rows| {
            let mut seen: HashSet<(PlantId, String, Option<String>, String)> = rows
                .names
                .iter()
                .map(owned_key)
                .collect();
            for name in &names {
                rows.require_plant(name.plant_id)?;
                if !seen.insert(owned_key(name)) {
                    return Err(CatalogError::validation(format!(
                        "name {:?} ({}{}) already recorded for plant {}",
                        name.name,
                        name.language,
                        name.country.as_deref().map(|c| format!("-{}", c)).unwrap_or_default(),
                        name.plant_id
                    )));
                }
            }
            rows.names.extend(names.iter().cloned());
            Ok(names.len())
        })
    }

    async fn replace_growing_conditions(
        &self,
        plant_id: PlantId,
        conditions: &[GrowingConditions],
    ) -> CatalogResult<()> {
        let mut normalized = Vec::with_capacity(conditions.len());
        for c in conditions {
            if c.plant_id != plant_id {
                return Err(CatalogError::validation(format!(
                    "growing conditions for plant {} submitted under plant {}",
                    c.plant_id, plant_id
                )));
            }
            normalized.push(c.normalized()?);
        }
        self.write(&[Table::Conditions], |rows| {
            rows.require_plant(plant_id)?;
            if normalized.is_empty() {
                rows.conditions.remove(&plant_id);
            } else {
                rows.conditions.insert(plant_id, normalized);
            }
            Ok(())
        })
    }

    async fn upsert_physical_characteristics(
        &self,
        physical: &PhysicalCharacteristics,
    ) -> CatalogResult<()> {
        physical.validate()?;
        self.write(&[Table::Plants], |rows| {
            rows.require_plant(physical.plant_id)?;
            rows.physical.insert(physical.plant_id, physical.clone());
            Ok(())
        })
    }

    async fn insert_companion(
        &self,
        relationship: &NewCompanionRelationship,
    ) -> CatalogResult<CompanionRelationship> {
        let rel = relationship.normalized()?;
        self.write(&[Table::Companions], |rows| {
            rows.require_plant(rel.plant_a)?;
            rows.require_plant(rel.plant_b)?;
            if rows
                .companions
                .values()
                .any(|r| r.plant_a == rel.plant_a && r.plant_b == rel.plant_b)
            {
                return Err(CatalogError::validation(format!(
                    "plants {} and {} already have a companion relationship",
                    rel.plant_a, rel.plant_b
                )));
            }
            let id = rows.next_relationship_id()?;
            let record = CompanionRelationship {
                id,
                plant_a: rel.plant_a,
                plant_b: rel.plant_b,
                relationship: rel.relationship,
                benefits: rel.benefits,
                optimal_distance_cm: rel.optimal_distance_cm,
                max_distance_cm: rel.max_distance_cm,
                notes: rel.notes,
                created_at: Utc::now(),
            };
            rows.companions.insert(id, record.clone());
            Ok(record)
        })
    }

    async fn delete_companion(&self, id: RelationshipId) -> CatalogResult<bool> {
        self.write(&[Table::Companions], |rows| {
            Ok(rows.companions.remove(&id).is_some())
        })
    }

    async fn upsert_language(&self, language: &Language) -> CatalogResult<()> {
        let language = Language::new(&language.code, &language.name)?;
        self.write(&[Table::Languages], |rows| {
            rows.languages.insert(language.code.clone(), language);
            Ok(())
        })
    }
}

fn owned_key(name: &LocalizedName) -> (PlantId, String, Option<String>, String) {
    let (plant, language, country, text) = name.unique_key();
    (
        plant,
        language.to_string(),
        country.map(str::to_string),
        text.to_string(),
    )
}

fn id_literals(ids: &[PlantId]) -> Vec<Expr> {
    ids.iter().map(|id| lit(id.get())).collect()
}

// ============================================================================
// Arrow conversion
// ============================================================================

fn mem_table<R: Serialize>(schema: SchemaRef, rows: &[R]) -> CatalogResult<Arc<MemTable>> {
    let mut batches = Vec::new();
    for chunk in rows.chunks(BATCH_SIZE) {
        let mut decoder = ReaderBuilder::new(schema.clone())
            .with_batch_size(BATCH_SIZE)
            .build_decoder()?;
        decoder.serialize(chunk)?;
        if let Some(batch) = decoder.flush()? {
            batches.push(batch);
        }
    }
    Ok(Arc::new(MemTable::try_new(schema, vec![batches])?))
}

/// Decode result batches through JSON into row structs
fn rows_from_batches<R: DeserializeOwned>(batches: &[RecordBatch]) -> CatalogResult<Vec<R>> {
    let total: usize = batches.iter().map(RecordBatch::num_rows).sum();
    if total == 0 {
        return Ok(Vec::new());
    }
    let mut buf = Vec::new();
    {
        let mut writer = ArrayWriter::new(&mut buf);
        for batch in batches {
            writer.write(batch)?;
        }
        writer.finish()?;
    }
    Ok(serde_json::from_slice(&buf)?)
}

fn parse_timestamp(raw: &str) -> CatalogResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CatalogError::Store(format!("bad timestamp {:?}: {}", raw, e)))
}

fn utf8(name: &str, nullable: bool) -> Field {
    Field::new(name, DataType::Utf8, nullable)
}

fn float(name: &str) -> Field {
    Field::new(name, DataType::Float64, true)
}

fn flag(name: &str) -> Field {
    Field::new(name, DataType::Boolean, true)
}

fn int64(name: &str) -> Field {
    Field::new(name, DataType::Int64, false)
}

// ---------------------------------------------------------------------------
// plants
// ---------------------------------------------------------------------------

fn plants_schema() -> SchemaRef {
    let mut fields = vec![
        int64("plant_id"),
        utf8("family", false),
        utf8("genus", false),
        utf8("species", false),
        utf8("cultivar", true),
        utf8("botanical_name", false),
        utf8("plant_type", true),
        utf8("common_names", true),
        Field::new("has_physical", DataType::Boolean, false),
        float("height_typical_m"),
        float("height_max_m"),
        float("spread_typical_m"),
        float("spread_max_m"),
        utf8("growth_rate", true),
    ];
    fields.extend(PlantTrait::ALL.iter().map(|t| flag(trait_column(*t))));
    fields.push(utf8("created_at", false));
    fields.push(utf8("updated_at", false));
    Arc::new(Schema::new(fields))
}

#[derive(Debug, Serialize, Deserialize)]
struct PlantRow {
    plant_id: PlantId,
    family: String,
    genus: String,
    species: String,
    cultivar: Option<String>,
    botanical_name: String,
    plant_type: Option<String>,
    common_names: Option<String>,
    has_physical: bool,
    height_typical_m: Option<f64>,
    height_max_m: Option<f64>,
    spread_typical_m: Option<f64>,
    spread_max_m: Option<f64>,
    growth_rate: Option<String>,
    trait_evergreen: Option<bool>,
    trait_deciduous: Option<bool>,
    trait_toxic: Option<bool>,
    trait_drought_tolerant: Option<bool>,
    trait_salt_tolerant: Option<bool>,
    trait_wind_tolerant: Option<bool>,
    created_at: String,
    updated_at: String,
}

fn plant_rows(rows: &CatalogRows) -> Vec<PlantRow> {
    let mut corpus: FxHashMap<PlantId, Vec<&str>> = FxHashMap::default();
    for name in &rows.names {
        corpus.entry(name.plant_id).or_default().push(name.name.as_str());
    }
    rows.plants
        .values()
        .map(|plant| {
            let names = corpus
                .get(&plant.id)
                .map(|names| names.join(CORPUS_SEPARATOR));
            PlantRow::from_record(plant, rows.physical.get(&plant.id), names)
        })
        .collect()
}

impl PlantRow {
    fn from_record(
        plant: &Plant,
        physical: Option<&PhysicalCharacteristics>,
        common_names: Option<String>,
    ) -> Self {
        let trait_value = |t: PlantTrait| physical.and_then(|p| p.traits.get(&t).copied());
        Self {
            plant_id: plant.id,
            family: plant.family.clone(),
            genus: plant.genus.clone(),
            species: plant.species.clone(),
            cultivar: plant.cultivar.clone(),
            botanical_name: plant.botanical_name.clone(),
            plant_type: plant.plant_type.clone(),
            common_names,
            has_physical: physical.is_some(),
            height_typical_m: physical.and_then(|p| p.height_typical_m),
            height_max_m: physical.and_then(|p| p.height_max_m),
            spread_typical_m: physical.and_then(|p| p.spread_typical_m),
            spread_max_m: physical.and_then(|p| p.spread_max_m),
            growth_rate: physical
                .and_then(|p| p.growth_rate)
                .map(|g| g.as_str().to_string()),
            trait_evergreen: trait_value(PlantTrait::Evergreen),
            trait_deciduous: trait_value(PlantTrait::Deciduous),
            trait_toxic: trait_value(PlantTrait::Toxic),
            trait_drought_tolerant: trait_value(PlantTrait::DroughtTolerant),
            trait_salt_tolerant: trait_value(PlantTrait::SaltTolerant),
            trait_wind_tolerant: trait_value(PlantTrait::WindTolerant),
            created_at: plant.created_at.to_rfc3339(),
            updated_at: plant.updated_at.to_rfc3339(),
        }
    }

    fn into_plant(self) -> CatalogResult<Plant> {
        Ok(Plant {
            id: self.plant_id,
            family: self.family,
            genus: self.genus,
            species: self.species,
            cultivar: self.cultivar,
            botanical_name: self.botanical_name,
            plant_type: self.plant_type,
            common_names: Vec::new(),
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }

    fn physical(&self) -> PhysicalCharacteristics {
        let mut traits = BTreeMap::new();
        for (t, value) in [
            (PlantTrait::Evergreen, self.trait_evergreen),
            (PlantTrait::Deciduous, self.trait_deciduous),
            (PlantTrait::Toxic, self.trait_toxic),
            (PlantTrait::DroughtTolerant, self.trait_drought_tolerant),
            (PlantTrait::SaltTolerant, self.trait_salt_tolerant),
            (PlantTrait::WindTolerant, self.trait_wind_tolerant),
        ] {
            if let Some(value) = value {
                traits.insert(t, value);
            }
        }
        PhysicalCharacteristics {
            plant_id: self.plant_id,
            height_typical_m: self.height_typical_m,
            height_max_m: self.height_max_m,
            spread_typical_m: self.spread_typical_m,
            spread_max_m: self.spread_max_m,
            growth_rate: self.growth_rate.as_deref().and_then(|g| g.parse().ok()),
            traits,
        }
    }
}

// ---------------------------------------------------------------------------
// localized_names / languages
// ---------------------------------------------------------------------------

fn names_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        int64("plant_id"),
        utf8("language", false),
        utf8("country", true),
        utf8("name", false),
        Field::new("is_primary", DataType::Boolean, false),
    ]))
}

fn languages_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![utf8("code", false), utf8("name", false)]))
}

// ---------------------------------------------------------------------------
// growing_conditions
// ---------------------------------------------------------------------------

fn conditions_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        int64("plant_id"),
        int64("position"),
        utf8("country", true),
        utf8("hardiness_zones", true),
        utf8("heat_zones", true),
        utf8("sun_requirements", true),
        utf8("water_requirement", true),
        utf8("soil_types", true),
        float("soil_ph_min"),
        float("soil_ph_max"),
        flag("drought_tolerant"),
        flag("salt_tolerant"),
        flag("wind_tolerant"),
        utf8("flowering_months", true),
        utf8("fruiting_months", true),
        utf8("confidence", false),
        int64("confidence_rank"),
    ]))
}

#[derive(Debug, Serialize, Deserialize)]
struct ConditionRow {
    plant_id: PlantId,
    position: i64,
    country: Option<String>,
    hardiness_zones: Option<String>,
    heat_zones: Option<String>,
    sun_requirements: Option<String>,
    water_requirement: Option<String>,
    soil_types: Option<String>,
    soil_ph_min: Option<f64>,
    soil_ph_max: Option<f64>,
    drought_tolerant: Option<bool>,
    salt_tolerant: Option<bool>,
    wind_tolerant: Option<bool>,
    flowering_months: Option<String>,
    fruiting_months: Option<String>,
    confidence: String,
    confidence_rank: i64,
}

impl ConditionRow {
    fn from_record(c: &GrowingConditions, position: usize) -> Self {
        Self {
            plant_id: c.plant_id,
            position: position as i64,
            country: c.country.clone(),
            hardiness_zones: encode_list(&c.hardiness_zones),
            heat_zones: encode_list(&c.heat_zones),
            sun_requirements: encode_list(c.sun_requirements.iter().map(|s| s.as_str())),
            water_requirement: c.water_requirement.map(|w| w.as_str().to_string()),
            soil_types: encode_list(c.soil_types.iter().map(|s| s.as_str())),
            soil_ph_min: c.soil_ph_min,
            soil_ph_max: c.soil_ph_max,
            drought_tolerant: c.drought_tolerant,
            salt_tolerant: c.salt_tolerant,
            wind_tolerant: c.wind_tolerant,
            flowering_months: encode_list(c.flowering_months.iter().map(u8::to_string)),
            fruiting_months: encode_list(c.fruiting_months.iter().map(u8::to_string)),
            confidence: c.confidence.as_str().to_string(),
            confidence_rank: c.confidence.rank(),
        }
    }

    fn into_record(self) -> CatalogResult<GrowingConditions> {
        Ok(GrowingConditions {
            plant_id: self.plant_id,
            country: self.country,
            hardiness_zones: decode_list(self.hardiness_zones.as_deref()).into_iter().collect(),
            heat_zones: decode_list(self.heat_zones.as_deref()).into_iter().collect(),
            sun_requirements: parse_set(self.sun_requirements.as_deref())?,
            water_requirement: self.water_requirement.as_deref().map(str::parse).transpose()?,
            soil_types: parse_set(self.soil_types.as_deref())?,
            soil_ph_min: self.soil_ph_min,
            soil_ph_max: self.soil_ph_max,
            drought_tolerant: self.drought_tolerant,
            salt_tolerant: self.salt_tolerant,
            wind_tolerant: self.wind_tolerant,
            flowering_months: parse_months(self.flowering_months.as_deref())?,
            fruiting_months: parse_months(self.fruiting_months.as_deref())?,
            confidence: self.confidence.parse::<Confidence>()?,
        })
    }
}

fn parse_set<T>(encoded: Option<&str>) -> CatalogResult<BTreeSet<T>>
where
    T: std::str::FromStr<Err = CatalogError> + Ord,
{
    decode_list(encoded).iter().map(|s| s.parse()).collect()
}

fn parse_months(encoded: Option<&str>) -> CatalogResult<BTreeSet<u8>> {
    decode_list(encoded)
        .iter()
        .map(|m| {
            m.parse::<u8>()
                .map_err(|_| CatalogError::Store(format!("bad month {:?}", m)))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// companions
// ---------------------------------------------------------------------------

fn companions_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        int64("relationship_id"),
        int64("plant_a"),
        int64("plant_b"),
        utf8("relationship_type", false),
        utf8("benefits", true),
        float("optimal_distance_cm"),
        float("max_distance_cm"),
        utf8("notes", true),
        utf8("created_at", false),
    ]))
}

#[derive(Debug, Serialize, Deserialize)]
struct CompanionRow {
    relationship_id: RelationshipId,
    plant_a: PlantId,
    plant_b: PlantId,
    relationship_type: String,
    benefits: Option<String>,
    optimal_distance_cm: Option<f64>,
    max_distance_cm: Option<f64>,
    notes: Option<String>,
    created_at: String,
}

impl CompanionRow {
    fn from_record(rel: &CompanionRelationship) -> Self {
        Self {
            relationship_id: rel.id,
            plant_a: rel.plant_a,
            plant_b: rel.plant_b,
            relationship_type: rel.relationship.as_str().to_string(),
            benefits: encode_list(&rel.benefits),
            optimal_distance_cm: rel.optimal_distance_cm,
            max_distance_cm: rel.max_distance_cm,
            notes: rel.notes.clone(),
            created_at: rel.created_at.to_rfc3339(),
        }
    }

    fn into_record(self) -> CatalogResult<CompanionRelationship> {
        Ok(CompanionRelationship {
            id: self.relationship_id,
            plant_a: self.plant_a,
            plant_b: self.plant_b,
            relationship: self.relationship_type.parse::<RelationshipType>()?,
            benefits: decode_list(self.benefits.as_deref()).into_iter().collect(),
            optimal_distance_cm: self.optimal_distance_cm,
            max_distance_cm: self.max_distance_cm,
            notes: self.notes,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SearchFilter;
    use crate::predicate::compile_search;
    use crate::model::{SunRequirement, WaterRequirement};

    async fn engine_with(plants: &[(&str, &str, &str)]) -> (QueryEngine, Vec<PlantId>) {
        let engine = QueryEngine::new().unwrap();
        let mut ids = Vec::new();
        for (family, genus, species) in plants {
            let plant = engine
                .insert_plant(&NewPlant::new(family, genus, species))
                .await
                .unwrap();
            ids.push(plant.id);
        }
        (engine, ids)
    }

    #[tokio::test]
    async fn test_ids_follow_creation_order() {
        let (engine, ids) = engine_with(&[
            ("Rosaceae", "Rosa", "canina"),
            ("Lamiaceae", "Salvia", "officinalis"),
        ])
        .await;
        assert!(ids[0] < ids[1]);

        let plants = engine.plants_by_ids(&[ids[1], ids[0]]).await.unwrap();
        assert_eq!(plants.len(), 2);
        assert_eq!(plants[0].botanical_name, "Rosa canina");
        assert_eq!(plants[1].family, "Lamiaceae");
    }

    #[tokio::test]
    async fn test_round_trip_keeps_timestamps() {
        let (engine, ids) = engine_with(&[("Rosaceae", "Rosa", "canina")]).await;
        let stored = engine.plants_by_ids(&ids).await.unwrap().remove(0);
        let snapshot = engine.snapshot.read().unwrap().rows.plants[&ids[0]].clone();
        assert_eq!(stored.created_at, snapshot.created_at);
    }

    #[tokio::test]
    async fn test_names_scoped_by_language_and_country() {
        let (engine, ids) = engine_with(&[("Solanaceae", "Solanum", "melongena")]).await;
        let id = ids[0];
        engine
            .insert_names(&[
                LocalizedName::new(id, "en", None, "Aubergine"),
                LocalizedName::new(id, "en", Some("US"), "Eggplant"),
                LocalizedName::new(id, "fr", None, "Aubergine"),
            ])
            .await
            .unwrap();

        let us = engine.names_for(&[id], "en", Some("US")).await.unwrap();
        assert_eq!(us.len(), 2);
        let global = engine.names_for(&[id], "en", None).await.unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].name, "Aubergine");
        assert_eq!(engine.stats().name_queries, 2);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejects_whole_batch() {
        let (engine, ids) = engine_with(&[("Rosaceae", "Rosa", "canina")]).await;
        let id = ids[0];
        engine
            .insert_names(&[LocalizedName::new(id, "en", None, "Dog rose")])
            .await
            .unwrap();

        let err = engine
            .insert_names(&[
                LocalizedName::new(id, "en", None, "Briar"),
                LocalizedName::new(id, "en", None, "Dog rose"),
            ])
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(engine.names_for(&[id], "en", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_condition_predicates_use_any_single_assertion() {
        let (engine, ids) = engine_with(&[
            ("Rosaceae", "Rosa", "canina"),
            ("Lamiaceae", "Salvia", "officinalis"),
        ])
        .await;

        let mut sunny = GrowingConditions::new(ids[0], Confidence::Confirmed);
        sunny.sun_requirements.insert(SunRequirement::FullSun);
        sunny.hardiness_zones.insert("5a".into());
        let mut shady = GrowingConditions::new(ids[0], Confidence::Possible);
        shady.sun_requirements.insert(SunRequirement::FullShade);
        shady.hardiness_zones.insert("7b".into());
        engine
            .replace_growing_conditions(ids[0], &[sunny, shady])
            .await
            .unwrap();

        let mut sage = GrowingConditions::new(ids[1], Confidence::Probable);
        sage.water_requirement = Some(WaterRequirement::Low);
        sage.hardiness_zones.insert("15".into());
        engine.replace_growing_conditions(ids[1], &[sage]).await.unwrap();

        let filter = compile_search(
            &SearchFilter::new()
                .with_sun(SunRequirement::FullSun)
                .with_hardiness_zone("5a"),
        )
        .unwrap();
        let found = engine.query_plants(&PlantQuery::new(filter.clone(), 10)).await.unwrap();
        assert_eq!(found.iter().map(|p| p.id).collect::<Vec<_>>(), vec![ids[0]]);
        assert_eq!(engine.count_plants(&filter).await.unwrap(), 1);

        // "1" must not match the "15" token
        let filter = compile_search(&SearchFilter::new().with_hardiness_zone("1")).unwrap();
        assert!(engine.query_plants(&PlantQuery::new(filter, 10)).await.unwrap().is_empty());

        // both predicates must hold on the same assertion
        let filter = compile_search(
            &SearchFilter::new()
                .with_sun(SunRequirement::FullSun)
                .with_hardiness_zone("7b"),
        )
        .unwrap();
        assert!(engine.query_plants(&PlantQuery::new(filter, 10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conditions_round_trip_country_first() {
        let (engine, ids) = engine_with(&[("Rosaceae", "Rosa", "canina")]).await;
        let global = GrowingConditions::new(ids[0], Confidence::Confirmed);
        let mut british = GrowingConditions::new(ids[0], Confidence::Possible);
        british.country = Some("GB".into());
        british.flowering_months.extend([6, 7]);
        engine
            .replace_growing_conditions(ids[0], &[global, british.clone()])
            .await
            .unwrap();

        let rows = engine.growing_conditions(ids[0], Some("GB")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], british);
        assert_eq!(rows[1].country, None);

        let rows = engine.growing_conditions(ids[0], None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].confidence, Confidence::Confirmed);
    }

    #[tokio::test]
    async fn test_keyset_by_botanical_name() {
        let (engine, ids) = engine_with(&[
            ("Rosaceae", "Rosa", "canina"),
            ("Lamiaceae", "Achillea", "millefolium"),
            ("Rosaceae", "Rosa", "canina"),
        ])
        .await;
        let query = PlantQuery::new(CompiledFilter::default(), 10)
            .sorted_by(SortKey::BotanicalName, SortDirection::Asc)
            .after(Some(Keyset {
                value: Some("Rosa canina".into()),
                id: ids[0],
            }));
        let rest = engine.query_plants(&query).await.unwrap();
        assert_eq!(rest.iter().map(|p| p.id).collect::<Vec<_>>(), vec![ids[2]]);

        let query = PlantQuery::new(CompiledFilter::default(), 10)
            .sorted_by(SortKey::Id, SortDirection::Desc);
        let all = engine.query_plants(&query).await.unwrap();
        assert_eq!(all.first().map(|p| p.id), Some(ids[2]));
    }

    #[tokio::test]
    async fn test_delete_plant_cascades() {
        let (engine, ids) = engine_with(&[
            ("Solanaceae", "Solanum", "lycopersicum"),
            ("Lamiaceae", "Ocimum", "basilicum"),
        ])
        .await;
        engine
            .insert_companion(&NewCompanionRelationship::new(
                ids[0],
                ids[1],
                RelationshipType::Beneficial,
            ))
            .await
            .unwrap();
        engine
            .upsert_physical_characteristics(
                &PhysicalCharacteristics::new(ids[1]).with_heights(Some(0.4), Some(0.6)),
            )
            .await
            .unwrap();

        assert!(engine.delete_plant(ids[1]).await.unwrap());
        assert!(!engine.delete_plant(ids[1]).await.unwrap());
        assert!(engine.physical_characteristics(ids[1]).await.unwrap().is_none());

        let predicates = [Predicate::IdEquals {
            column: Column::PlantA,
            id: ids[0].get(),
        }];
        assert!(engine.companions(&predicates).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_companion_requires_both_plants() {
        let (engine, ids) = engine_with(&[("Solanaceae", "Solanum", "lycopersicum")]).await;
        let missing = PlantId::new(999).unwrap();
        let err = engine
            .insert_companion(&NewCompanionRelationship::new(
                ids[0],
                missing,
                RelationshipType::Beneficial,
            ))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_physical_round_trip() {
        let (engine, ids) = engine_with(&[("Pinaceae", "Pinus", "sylvestris")]).await;
        assert!(engine.physical_characteristics(ids[0]).await.unwrap().is_none());

        let physical = PhysicalCharacteristics::new(ids[0])
            .with_heights(Some(15.0), Some(35.0))
            .with_trait(PlantTrait::Evergreen, true)
            .with_trait(PlantTrait::Toxic, false);
        engine.upsert_physical_characteristics(&physical).await.unwrap();
        assert_eq!(
            engine.physical_characteristics(ids[0]).await.unwrap(),
            Some(physical)
        );
    }

    #[tokio::test]
    async fn test_taxonomy_is_distinct() {
        let (engine, _) = engine_with(&[
            ("Rosaceae", "Rosa", "canina"),
            ("Rosaceae", "Rosa", "rugosa"),
            ("Lamiaceae", "Salvia", "officinalis"),
        ])
        .await;
        assert_eq!(
            engine.taxonomy().await.unwrap(),
            vec![
                ("Lamiaceae".to_string(), "Salvia".to_string()),
                ("Rosaceae".to_string(), "Rosa".to_string()),
            ]
        );
    }
}

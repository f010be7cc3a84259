//! Search composition and keyset pagination
//!
//! A search is free text plus a `SearchFilter`. The composer compiles both
//! into one predicate set, fetches `limit + 1` rows past the cursor to learn
//! whether another page exists, counts the full match set with a separate
//! query over the same predicates, and attaches localized names to the page
//! with one grouped load.
//!
//! Cursors are opaque: base64 of the sort, direction and the last row's sort
//! value and id. Paging is keyset based, so rows inserted between two page
//! requests never shift or duplicate rows across the page boundary.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::batch_loader::BatchLoader;
use crate::config::CatalogConfig;
use crate::error::{CatalogError, CatalogResult};
use crate::filter::{GrowingConditionsFilter, SearchFilter, SortDirection, SortField};
use crate::model::{Locale, Plant, PlantId};
use crate::predicate::{compile_conditions, compile_search, CompiledFilter};
use crate::store::{bounded, CatalogStore, Keyset, PlantQuery, SortKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub items: Vec<Plant>,
    /// Size of the full match set, independent of pagination
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

// ============================================================================
// Cursor
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "s")]
    pub sort: SortKey,
    #[serde(rename = "d")]
    pub direction: SortDirection,
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "i")]
    pub id: PlantId,
}

impl Cursor {
    /// Cursor positioned after `plant` in the given order
    pub fn after(plant: &Plant, sort: SortKey, direction: SortDirection) -> Self {
        let value = match sort {
            SortKey::Id => None,
            SortKey::BotanicalName => Some(plant.botanical_name.clone()),
        };
        Self {
            sort,
            direction,
            value,
            id: plant.id,
        }
    }

    pub fn encode(&self) -> CatalogResult<String> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(raw: &str) -> CatalogResult<Self> {
        let malformed = || CatalogError::validation(format!("malformed cursor {:?}", raw));
        let bytes = URL_SAFE_NO_PAD.decode(raw.trim()).map_err(|_| malformed())?;
        let cursor: Cursor = serde_json::from_slice(&bytes).map_err(|_| malformed())?;
        if cursor.sort == SortKey::BotanicalName && cursor.value.is_none() {
            return Err(malformed());
        }
        Ok(cursor)
    }

    fn keyset(self) -> Keyset {
        Keyset {
            value: self.value,
            id: self.id,
        }
    }
}

/// Store ordering for a requested sort
///
/// Relevance has no scoring model behind it: with free text it orders by
/// botanical name, without text it falls back to creation order.
pub fn effective_sort(sort: SortField, has_text: bool) -> SortKey {
    match sort {
        SortField::CreatedAt => SortKey::Id,
        SortField::BotanicalName => SortKey::BotanicalName,
        SortField::Relevance if has_text => SortKey::BotanicalName,
        SortField::Relevance => SortKey::Id,
    }
}

// ============================================================================
// Composer
// ============================================================================

struct PageRequest<'a> {
    sort: SortKey,
    direction: SortDirection,
    limit: usize,
    cursor: Option<&'a str>,
}

#[derive(Clone)]
pub struct SearchComposer {
    store: Arc<dyn CatalogStore>,
    loader: BatchLoader,
    config: Arc<CatalogConfig>,
}

impl SearchComposer {
    pub fn new(store: Arc<dyn CatalogStore>, loader: BatchLoader, config: Arc<CatalogConfig>) -> Self {
        Self {
            store,
            loader,
            config,
        }
    }

    fn compile(text: Option<&str>, filter: &SearchFilter) -> CatalogResult<CompiledFilter> {
        Ok(compile_search(filter)?.with_text(text))
    }

    pub async fn search(
        &self,
        text: Option<&str>,
        filter: &SearchFilter,
        locale: &Locale,
    ) -> CatalogResult<SearchPage> {
        let compiled = Self::compile(text, filter)?;
        let has_text = text.map_or(false, |t| !t.trim().is_empty());
        let sort = effective_sort(filter.sort, has_text);
        if filter.sort == SortField::Relevance && sort == SortKey::BotanicalName {
            tracing::debug!("Relevance sort served as botanical-name order");
        }

        let page = PageRequest {
            sort,
            direction: filter.direction,
            limit: self.config.page_size(filter.limit),
            cursor: filter.cursor.as_deref(),
        };
        self.page(compiled, page, locale).await
    }

    /// Plants with at least one assertion satisfying every condition, in id order
    pub async fn search_conditions(
        &self,
        filter: &GrowingConditionsFilter,
        locale: &Locale,
    ) -> CatalogResult<SearchPage> {
        let compiled = CompiledFilter {
            plant: Vec::new(),
            conditions: compile_conditions(filter)?,
        };
        let page = PageRequest {
            sort: SortKey::Id,
            direction: SortDirection::Asc,
            limit: self.config.page_size(filter.limit),
            cursor: filter.cursor.as_deref(),
        };
        self.page(compiled, page, locale).await
    }

    async fn page(
        &self,
        compiled: CompiledFilter,
        page: PageRequest<'_>,
        locale: &Locale,
    ) -> CatalogResult<SearchPage> {
        let after = match page.cursor {
            Some(raw) => {
                let cursor = Cursor::decode(raw)?;
                if cursor.sort != page.sort || cursor.direction != page.direction {
                    return Err(CatalogError::validation(
                        "cursor was issued for a different sort order",
                    ));
                }
                Some(cursor.keyset())
            }
            None => None,
        };

        let limit = page.limit;
        let query = PlantQuery::new(compiled.clone(), limit + 1)
            .sorted_by(page.sort, page.direction)
            .after(after);

        let timeout = self.config.store_timeout();
        let mut items = bounded(timeout, self.store.query_plants(&query)).await?;
        let has_more = items.len() > limit;
        items.truncate(limit);

        let total = bounded(timeout, self.store.count_plants(&compiled)).await?;
        self.loader.attach_names(&mut items, locale).await?;

        let next_cursor = match items.last() {
            Some(last) if has_more => Some(Cursor::after(last, page.sort, page.direction).encode()?),
            _ => None,
        };

        tracing::debug!(
            "Search returned {} of {} plants (has_more={})",
            items.len(),
            total,
            has_more
        );
        Ok(SearchPage {
            items,
            total,
            next_cursor,
            has_more,
        })
    }

    /// Number of plants matching text and filter; pagination fields are ignored
    pub async fn count(&self, text: Option<&str>, filter: &SearchFilter) -> CatalogResult<u64> {
        let compiled = Self::compile(text, &filter.without_pagination())?;
        bounded(self.config.store_timeout(), self.store.count_plants(&compiled)).await
    }
}

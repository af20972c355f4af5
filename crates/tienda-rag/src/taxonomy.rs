//! Category taxonomy, derived from the live catalog and cached.
//!
//! The classifier prompt embeds the real category/subcategory names so the
//! oracle can only pick labels that exist. A full catalog scan is expensive,
//! so the derived map is cached for [`DEFAULT_TAXONOMY_TTL_SECS`] and a
//! hardcoded snapshot covers the store being unreachable.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::catalog::CatalogStore;

pub const DEFAULT_TAXONOMY_TTL_SECS: u64 = 3600;

/// Category name to sorted subcategory names. BTreeMap keeps the prompt
/// listing stable between runs.
pub type Taxonomy = BTreeMap<String, Vec<String>>;

// ---------------------------------------------------------------------------
// Clock seam
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CachedTaxonomy {
    taxonomy: Taxonomy,
    fetched_at: Instant,
}

pub struct TaxonomyCache {
    store: Arc<dyn CatalogStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    state: RwLock<Option<CachedTaxonomy>>,
}

impl TaxonomyCache {
    pub fn new(store: Arc<dyn CatalogStore>, ttl: Duration) -> Self {
        Self::with_clock(store, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn CatalogStore>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl,
            state: RwLock::new(None),
        }
    }

    /// Current taxonomy: cached copy while fresh, otherwise one catalog scan.
    /// A failed scan is not cached, so the next call retries the store.
    pub async fn get(&self) -> Taxonomy {
        let now = self.clock.now();

        {
            let state = self.state.read();
            if let Some(cached) = state.as_ref() {
                if now.duration_since(cached.fetched_at) < self.ttl {
                    return cached.taxonomy.clone();
                }
            }
        }

        let products = match self.store.scan().await {
            Ok(products) => products,
            Err(e) => {
                tracing::warn!(error = %e, "taxonomy scan failed, using fallback snapshot");
                return fallback_taxonomy();
            }
        };

        let mut taxonomy: Taxonomy = BTreeMap::new();
        for product in products.iter().filter(|p| p.active) {
            if product.category.trim().is_empty() {
                continue;
            }
            let subcategories = taxonomy.entry(product.category.clone()).or_default();
            let subcategory = product.subcategory.trim();
            if !subcategory.is_empty() && !subcategories.iter().any(|s| s == subcategory) {
                subcategories.push(subcategory.to_string());
            }
        }
        for subcategories in taxonomy.values_mut() {
            subcategories.sort();
        }

        tracing::debug!(categories = taxonomy.len(), "taxonomy refreshed from catalog");

        let mut state = self.state.write();
        *state = Some(CachedTaxonomy {
            taxonomy: taxonomy.clone(),
            fetched_at: now,
        });
        taxonomy
    }

    /// Drop the cached copy so the next `get` rescans.
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        *state = None;
    }
}

/// Snapshot used when the catalog cannot be scanned. Mirrors the store's
/// long-standing sections so the classifier still gets plausible labels.
pub fn fallback_taxonomy() -> Taxonomy {
    let mut taxonomy = BTreeMap::new();
    taxonomy.insert(
        "Bolsos y Mochilas".to_string(),
        vec![
            "Bolsos y mochilas".to_string(),
            "Mochila de niña".to_string(),
            "Mochilas".to_string(),
        ],
    );
    taxonomy.insert(
        "Conjuntos".to_string(),
        vec![
            "Bodies para bebé".to_string(),
            "Conjunto de bebé".to_string(),
            "Pijamas".to_string(),
        ],
    );
    taxonomy.insert(
        "Maternidad".to_string(),
        vec![
            "Batas maternas".to_string(),
            "Blusas de Maternidad".to_string(),
            "Polos de maternidad".to_string(),
        ],
    );
    taxonomy.insert(
        "Prendas superiores".to_string(),
        vec![
            "Polos del diario".to_string(),
            "Polos infantiles".to_string(),
        ],
    );
    taxonomy
}

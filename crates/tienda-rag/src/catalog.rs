//! Catalog store boundary.
//!
//! The pipeline reads products through the `CatalogStore` trait only: point
//! lookup by id, equality-filtered listing, and a full scan for taxonomy
//! derivation. Writes belong to the CRUD layer outside this crate.
//! `InMemoryCatalog` backs tests and local demos.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::types::Product;

/// Equality predicates applied server-side by the store.
#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    /// `None` means both active and inactive.
    pub active: Option<bool>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Point lookup. `Ok(None)` when the id does not exist.
    async fn get(&self, id: &str) -> Result<Option<Product>>;

    /// Equality-filtered listing, newest first, truncated to `query.limit`.
    async fn list(&self, query: &CatalogQuery) -> Result<Vec<Product>>;

    /// Full collection scan, newest first.
    async fn scan(&self) -> Result<Vec<Product>>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Keyed document map guarded by a single lock. Lock scopes stay short and
/// never cross an await.
#[derive(Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<String, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a product under a freshly assigned id, stamping the creation
    /// time. Returns the id.
    pub fn insert(&self, mut product: Product) -> String {
        let id = Uuid::new_v4().to_string();
        product.id = id.clone();
        if product.created_at.is_none() {
            product.created_at = Some(Utc::now());
        }
        self.products.write().insert(id.clone(), product);
        tracing::debug!(id = %id, "catalog insert");
        id
    }

    /// Store a product keeping the id it already carries. Used by tests that
    /// need predictable ids.
    pub fn insert_with_id(&self, product: Product) {
        self.products
            .write()
            .insert(product.id.clone(), product);
    }

    pub fn remove(&self, id: &str) -> Option<Product> {
        self.products.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.products.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.read().is_empty()
    }

    fn snapshot_sorted(&self) -> Vec<Product> {
        let mut products: Vec<Product> = self.products.read().values().cloned().collect();
        // Newest first, id as tiebreak, so listings are stable across calls.
        products.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        products
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn get(&self, id: &str) -> Result<Option<Product>> {
        Ok(self.products.read().get(id).cloned())
    }

    async fn list(&self, query: &CatalogQuery) -> Result<Vec<Product>> {
        let mut products = self.snapshot_sorted();

        if let Some(active) = query.active {
            products.retain(|p| p.active == active);
        }
        if let Some(ref category) = query.category {
            products.retain(|p| &p.category == category);
        }
        if let Some(ref subcategory) = query.subcategory {
            products.retain(|p| &p.subcategory == subcategory);
        }
        if let Some(limit) = query.limit {
            products.truncate(limit);
        }

        Ok(products)
    }

    async fn scan(&self) -> Result<Vec<Product>> {
        Ok(self.snapshot_sorted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SizeOffer, Variation};
    use chrono::{Duration, Utc};

    fn make_product(name: &str, category: &str, active: bool) -> Product {
        Product {
            id: String::new(),
            name: name.to_string(),
            description: format!("{} de prueba", name),
            category: category.to_string(),
            subcategory: format!("{} sub", category),
            variations: vec![Variation {
                colors: vec!["azul".to_string()],
                image_url: String::new(),
                sizes: vec![SizeOffer {
                    label: "M".to_string(),
                    quantity: 3,
                    price: 25.0,
                }],
            }],
            created_at: None,
            active,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_timestamp() {
        let catalog = InMemoryCatalog::new();
        let id = catalog.insert(make_product("Mochila Osito", "Bolsos y Mochilas", true));

        let stored = catalog.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert!(stored.created_at.is_some());
    }

    #[tokio::test]
    async fn test_get_missing_id_is_none() {
        let catalog = InMemoryCatalog::new();
        assert!(catalog.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_category_and_active() {
        let catalog = InMemoryCatalog::new();
        catalog.insert(make_product("Mochila Osito", "Bolsos y Mochilas", true));
        catalog.insert(make_product("Mochila Vieja", "Bolsos y Mochilas", false));
        catalog.insert(make_product("Conjunto Aurora", "Conjuntos", true));

        let query = CatalogQuery {
            category: Some("Bolsos y Mochilas".to_string()),
            active: Some(true),
            ..Default::default()
        };
        let results = catalog.list(&query).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Mochila Osito");
    }

    #[tokio::test]
    async fn test_list_applies_limit_newest_first() {
        let catalog = InMemoryCatalog::new();
        let base = Utc::now();
        for i in 0..5 {
            let mut product = make_product(&format!("Producto {}", i), "Conjuntos", true);
            product.created_at = Some(base + Duration::seconds(i));
            catalog.insert(product);
        }

        let query = CatalogQuery {
            limit: Some(2),
            ..Default::default()
        };
        let results = catalog.list(&query).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "Producto 4");
        assert_eq!(results[1].name, "Producto 3");
    }

    #[tokio::test]
    async fn test_scan_is_stable_across_calls() {
        let catalog = InMemoryCatalog::new();
        for i in 0..4 {
            catalog.insert(make_product(&format!("P{}", i), "Conjuntos", true));
        }

        let first: Vec<String> = catalog.scan().await.unwrap().iter().map(|p| p.id.clone()).collect();
        let second: Vec<String> = catalog.scan().await.unwrap().iter().map(|p| p.id.clone()).collect();
        assert_eq!(first, second);
    }
}

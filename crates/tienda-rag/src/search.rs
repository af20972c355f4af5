//! Structured catalog search.
//!
//! Deterministic first-pass retrieval: equality filters are pushed to the
//! store, text/color/size filtering and relevance ranking happen client-side
//! over a `2×limit` candidate window. Store errors surface as empty result
//! lists — this layer never fails its caller.

use futures::future::join_all;

use crate::catalog::{CatalogQuery, CatalogStore};
use crate::types::Product;

pub const DEFAULT_SEARCH_LIMIT: usize = 3;
/// Extra candidates requested from the store to leave room for the
/// client-side filters.
const CANDIDATE_MULTIPLIER: usize = 2;
/// Pool size inspected when picking stock-heavy recommendations.
const RECOMMENDED_POOL: usize = 10;

/// Search filter. Any subset of fields may be set; `limit` and `active`
/// carry the defaults the rest of the pipeline expects.
#[derive(Debug, Clone)]
pub struct SearchFilter {
    pub text: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub limit: usize,
    pub active: bool,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            text: None,
            category: None,
            subcategory: None,
            color: None,
            size: None,
            limit: DEFAULT_SEARCH_LIMIT,
            active: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Core search
// ---------------------------------------------------------------------------

/// Run a structured search. Ordering is deterministic for a fixed catalog
/// snapshot: relevance score descending, store order (newest first) breaking
/// ties.
pub async fn search(store: &dyn CatalogStore, filter: &SearchFilter) -> Vec<Product> {
    let query = CatalogQuery {
        category: filter.category.clone(),
        subcategory: filter.subcategory.clone(),
        active: Some(filter.active),
        limit: Some(filter.limit.max(1) * CANDIDATE_MULTIPLIER),
    };

    let mut products = match store.list(&query).await {
        Ok(products) => products,
        Err(e) => {
            tracing::warn!(error = %e, "catalog listing failed, returning no results");
            return Vec::new();
        }
    };

    if let Some(ref text) = filter.text {
        let matched = filter_by_text(&products, text);
        // Text is additive: when equality filters already narrowed the set,
        // a text wipeout keeps the equality hits instead of emptying them.
        let had_equality = filter.category.is_some() || filter.subcategory.is_some();
        if !matched.is_empty() || !had_equality {
            products = matched;
        }
    }

    if let Some(ref color) = filter.color {
        products.retain(|p| p.has_color(color));
    }

    if let Some(ref size) = filter.size {
        products.retain(|p| p.has_size_in_stock(size));
    }

    rank_by_relevance(&mut products, filter);
    products.truncate(filter.limit);

    tracing::debug!(
        count = products.len(),
        text = filter.text.as_deref().unwrap_or(""),
        category = filter.category.as_deref().unwrap_or(""),
        "search complete"
    );

    products
}

/// Run several independent searches concurrently and merge their results,
/// de-duplicating on product id with the first occurrence winning.
pub async fn search_many(store: &dyn CatalogStore, filters: Vec<SearchFilter>) -> Vec<Product> {
    let searches = filters
        .iter()
        .map(|filter| async move { search(store, filter).await });
    let batches = join_all(searches).await;
    merge_unique(batches)
}

/// Per-category concurrent fan-out.
pub async fn search_categories(
    store: &dyn CatalogStore,
    categories: &[String],
    per_category_limit: usize,
) -> Vec<Product> {
    let filters = categories
        .iter()
        .map(|category| SearchFilter {
            category: Some(category.clone()),
            limit: per_category_limit,
            ..Default::default()
        })
        .collect();
    search_many(store, filters).await
}

/// Merge result batches keeping the first occurrence of each product id.
pub fn merge_unique(batches: Vec<Vec<Product>>) -> Vec<Product> {
    let mut merged: Vec<Product> = Vec::new();
    for batch in batches {
        for product in batch {
            if !merged.iter().any(|p| p.id == product.id) {
                merged.push(product);
            }
        }
    }
    merged
}

// ---------------------------------------------------------------------------
// Conveniences
// ---------------------------------------------------------------------------

/// Browse one category.
pub async fn search_by_category(
    store: &dyn CatalogStore,
    category: &str,
    limit: usize,
) -> Vec<Product> {
    let filter = SearchFilter {
        category: Some(category.to_string()),
        limit,
        ..Default::default()
    };
    search(store, &filter).await
}

/// Stock-heavy picks for "show me something" moments.
pub async fn recommended(store: &dyn CatalogStore, limit: usize) -> Vec<Product> {
    let filter = SearchFilter {
        limit: RECOMMENDED_POOL,
        ..Default::default()
    };
    let mut products = search(store, &filter).await;
    products.sort_by_key(|p| std::cmp::Reverse(p.total_stock()));
    products.truncate(limit);
    products
}

/// Same-category alternatives, excluding the product itself.
pub async fn similar_to(store: &dyn CatalogStore, product: &Product, limit: usize) -> Vec<Product> {
    let filter = SearchFilter {
        category: Some(product.category.clone()),
        limit: limit + 1,
        ..Default::default()
    };
    let mut products = search(store, &filter).await;
    products.retain(|p| p.id != product.id);
    products.truncate(limit);
    products
}

// ---------------------------------------------------------------------------
// Text matching
// ---------------------------------------------------------------------------

/// Small synonym table, keys and values in normalized form.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("bebe", &["baby", "angelitos", "cargador"]),
    ("baby", &["bebe", "angelitos", "cargador"]),
    ("bolso", &["cartera", "mochila"]),
    ("cartera", &["bolso"]),
    ("mochila", &["bolso"]),
    ("nino", &["nina", "infantil"]),
    ("nina", &["nino", "infantil"]),
];

/// Case-fold and strip Spanish diacritics so "bebé" and "bebe" compare equal.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            'ñ' => 'n',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

fn expand_term(term: &str) -> Vec<String> {
    let mut expanded = vec![term.to_string()];
    if let Some((_, synonyms)) = SYNONYMS.iter().find(|(key, _)| *key == term) {
        expanded.extend(synonyms.iter().map(|s| s.to_string()));
    }
    expanded
}

fn searchable_text(product: &Product) -> String {
    normalize_text(&format!(
        "{} {} {} {}",
        product.name, product.description, product.category, product.subcategory
    ))
}

/// Recall-oriented OR-match: keep products containing ANY expanded term.
fn filter_by_text(products: &[Product], text: &str) -> Vec<Product> {
    let terms: Vec<String> = normalize_text(text)
        .split_whitespace()
        .flat_map(expand_term)
        .collect();

    if terms.is_empty() {
        return products.to_vec();
    }

    products
        .iter()
        .filter(|p| {
            let haystack = searchable_text(p);
            terms.iter().any(|term| haystack.contains(term.as_str()))
        })
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Score = total stock, +10 when the whole query text appears in the name,
/// +5 when the category matches the filter exactly. Descending, stable.
fn rank_by_relevance(products: &mut [Product], filter: &SearchFilter) {
    let needle = filter.text.as_deref().map(normalize_text);

    products.sort_by_key(|p| {
        let mut score = p.total_stock() as i64;
        if let Some(ref needle) = needle {
            if !needle.is_empty() && normalize_text(&p.name).contains(needle.as_str()) {
                score += 10;
            }
        }
        if let Some(ref category) = filter.category {
            if &p.category == category {
                score += 5;
            }
        }
        std::cmp::Reverse(score)
    });
}

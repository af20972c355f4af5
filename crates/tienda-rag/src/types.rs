use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One purchasable unit within a variation. Quantity 0 means out of stock
/// but still enumerable (used for "available in other sizes" messaging).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeOffer {
    pub label: String,
    pub quantity: u32,
    pub price: f64,
}

/// One color/image grouping of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    pub colors: Vec<String>,
    pub image_url: String,
    pub sizes: Vec<SizeOffer>,
}

/// A catalog entry. Stock totals and price ranges are always derived from
/// the variations at read time, never stored alongside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub subcategory: String,
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Product {
    /// Sum of quantities across every variation and size offer.
    pub fn total_stock(&self) -> u32 {
        self.variations
            .iter()
            .flat_map(|v| v.sizes.iter())
            .map(|s| s.quantity)
            .sum()
    }

    /// (min, max) over every size offer's price. `None` for a product with
    /// no size offers at all.
    pub fn price_range(&self) -> Option<(f64, f64)> {
        let mut prices = self
            .variations
            .iter()
            .flat_map(|v| v.sizes.iter())
            .map(|s| s.price);

        let first = prices.next()?;
        let (min, max) = prices.fold((first, first), |(lo, hi), p| {
            (if p < lo { p } else { lo }, if p > hi { p } else { hi })
        });
        Some((min, max))
    }

    /// Lowest price across all size offers.
    pub fn min_price(&self) -> Option<f64> {
        self.price_range().map(|(min, _)| min)
    }

    /// Distinct non-blank color names across variations, first occurrence
    /// order preserved.
    pub fn available_colors(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for variation in &self.variations {
            for color in &variation.colors {
                let trimmed = color.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if !seen.iter().any(|c| c == trimmed) {
                    seen.push(trimmed.to_string());
                }
            }
        }
        seen
    }

    /// Distinct size labels that currently have stock, first occurrence
    /// order preserved.
    pub fn in_stock_size_labels(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for variation in &self.variations {
            for size in &variation.sizes {
                if size.quantity > 0 && !seen.iter().any(|l| l == &size.label) {
                    seen.push(size.label.clone());
                }
            }
        }
        seen
    }

    /// Every size offer with stock, flattened across variations.
    pub fn offers_in_stock(&self) -> Vec<&SizeOffer> {
        self.variations
            .iter()
            .flat_map(|v| v.sizes.iter())
            .filter(|s| s.quantity > 0)
            .collect()
    }

    /// True when any variation carries a size offer with exactly this label
    /// and positive stock. Size matching is stock-aware.
    pub fn has_size_in_stock(&self, label: &str) -> bool {
        self.variations
            .iter()
            .any(|v| v.sizes.iter().any(|s| s.label == label && s.quantity > 0))
    }

    /// True when any variation lists a color containing `color`
    /// case-insensitively. Color matching is NOT stock-aware.
    pub fn has_color(&self, color: &str) -> bool {
        let needle = color.to_lowercase();
        self.variations
            .iter()
            .any(|v| v.colors.iter().any(|c| c.to_lowercase().contains(&needle)))
    }
}

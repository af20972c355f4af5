//! Oracle-backed relevance filter.
//!
//! Runs only when the candidate set is big enough for reranking to matter.
//! The oracle picks ids off numbered summaries; the code only honors ids
//! that were actually offered, so a hallucinated id cannot smuggle a product
//! into the reply.

use std::time::Duration;

use serde::Deserialize;

use super::guarded_generate;
use crate::config::FilterTuning;
use crate::oracle::recovery::extract_json_array;
use crate::oracle::{recover_json, GenerationParams, Oracle};
use crate::prompts;
use crate::types::Product;

#[derive(Debug, Deserialize)]
struct WireSelection {
    #[serde(default)]
    productos_seleccionados: Vec<String>,
}

/// Narrow `candidates` to the most relevant ones. Never returns empty for a
/// non-empty input: oracle refusal degrades to a stock-ordered prefix.
pub async fn filter_candidates(
    oracle: &dyn Oracle,
    params: &GenerationParams,
    stage_timeout: Duration,
    utterance: &str,
    candidates: Vec<Product>,
    tuning: &FilterTuning,
) -> Vec<Product> {
    if candidates.len() <= tuning.skip_threshold {
        tracing::debug!(
            count = candidates.len(),
            "candidate set small, skipping oracle filter"
        );
        return candidates;
    }

    let prompt = prompts::filter_prompt(utterance, &candidates, tuning.max_selected);

    let raw = match guarded_generate(oracle, &prompt, params, stage_timeout).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "filter oracle call failed, keeping top stock");
            return top_by_stock(candidates, tuning.fallback_keep);
        }
    };

    let selected_ids = match recover_json::<WireSelection>(&raw) {
        Ok(wire) => wire.productos_seleccionados,
        Err(e) => {
            tracing::debug!(error = %e, "strict selection parse failed, trying lenient");
            extract_json_array(&raw, "productos_seleccionados").unwrap_or_default()
        }
    };

    let mut selected: Vec<Product> = candidates
        .iter()
        .filter(|p| selected_ids.iter().any(|id| id == &p.id))
        .cloned()
        .collect();
    selected.truncate(tuning.max_selected);

    if selected.is_empty() {
        tracing::warn!("oracle selected no known candidates, keeping top stock");
        return top_by_stock(candidates, tuning.fallback_keep);
    }

    tracing::debug!(count = selected.len(), "candidates filtered");
    selected
}

/// Deterministic fallback ranking, stable so equal stock keeps input order.
fn top_by_stock(mut candidates: Vec<Product>, keep: usize) -> Vec<Product> {
    candidates.sort_by_key(|p| std::cmp::Reverse(p.total_stock()));
    candidates.truncate(keep);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedOracle;
    use crate::types::{SizeOffer, Variation};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn make_product(id: &str, stock: u32) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Producto {}", id),
            description: "Prenda de algodón".to_string(),
            category: "Conjuntos".to_string(),
            subcategory: "Pijamas".to_string(),
            variations: vec![Variation {
                colors: vec!["azul".to_string()],
                image_url: String::new(),
                sizes: vec![SizeOffer {
                    label: "M".to_string(),
                    quantity: stock,
                    price: 25.0,
                }],
            }],
            created_at: None,
            active: true,
        }
    }

    fn eight_candidates() -> Vec<Product> {
        (0..8).map(|i| make_product(&format!("p{}", i), i as u32)).collect()
    }

    fn tuning() -> FilterTuning {
        FilterTuning {
            skip_threshold: 6,
            max_selected: 6,
            fallback_keep: 4,
        }
    }

    #[tokio::test]
    async fn test_small_sets_skip_the_oracle() {
        let oracle = ScriptedOracle::replying(&[]);
        let candidates: Vec<Product> = (0..4).map(|i| make_product(&format!("p{}", i), 1)).collect();

        let kept = filter_candidates(
            &oracle,
            &GenerationParams::default(),
            TIMEOUT,
            "pijamas",
            candidates.clone(),
            &tuning(),
        )
        .await;

        assert_eq!(kept.len(), 4);
        assert_eq!(oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn test_selection_honors_only_offered_ids() {
        let oracle = ScriptedOracle::replying(&[
            r#"{"productos_seleccionados": ["p2", "fantasma", "p5"]}"#,
        ]);

        let kept = filter_candidates(
            &oracle,
            &GenerationParams::default(),
            TIMEOUT,
            "pijamas",
            eight_candidates(),
            &tuning(),
        )
        .await;

        let ids: Vec<&str> = kept.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p5"]);
    }

    #[tokio::test]
    async fn test_overlong_selection_is_capped() {
        let oracle = ScriptedOracle::replying(&[
            r#"{"productos_seleccionados": ["p0","p1","p2","p3","p4","p5","p6","p7"]}"#,
        ]);

        let kept = filter_candidates(
            &oracle,
            &GenerationParams::default(),
            TIMEOUT,
            "pijamas",
            eight_candidates(),
            &tuning(),
        )
        .await;

        assert_eq!(kept.len(), 6);
    }

    #[tokio::test]
    async fn test_oracle_failure_keeps_top_stock() {
        let oracle = ScriptedOracle::failing();

        let kept = filter_candidates(
            &oracle,
            &GenerationParams::default(),
            TIMEOUT,
            "pijamas",
            eight_candidates(),
            &tuning(),
        )
        .await;

        assert_eq!(kept.len(), 4);
        // Highest stock first: p7 has stock 7
        assert_eq!(kept[0].id, "p7");
        assert_eq!(kept[3].id, "p4");
    }

    #[tokio::test]
    async fn test_empty_selection_falls_back() {
        let oracle = ScriptedOracle::replying(&[r#"{"productos_seleccionados": []}"#]);

        let kept = filter_candidates(
            &oracle,
            &GenerationParams::default(),
            TIMEOUT,
            "pijamas",
            eight_candidates(),
            &tuning(),
        )
        .await;

        assert_eq!(kept.len(), 4);
        assert_eq!(kept[0].id, "p7");
    }

    #[tokio::test]
    async fn test_loose_text_selection_salvaged() {
        let oracle = ScriptedOracle::replying(&[
            "Los relevantes son \"productos_seleccionados\": [\"p1\", \"p3\"] según la consulta",
        ]);

        let kept = filter_candidates(
            &oracle,
            &GenerationParams::default(),
            TIMEOUT,
            "pijamas",
            eight_candidates(),
            &tuning(),
        )
        .await;

        let ids: Vec<&str> = kept.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
    }
}

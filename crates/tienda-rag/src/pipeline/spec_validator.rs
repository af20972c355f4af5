//! Constraint validation against stated color, size and price wishes.
//!
//! Narrowing only: the outcome is always a subset of the incoming
//! candidates. An empty outcome is legal and means the stated constraints
//! matched nothing; the engine decides what to re-present in that case.

use std::time::Duration;

use serde::Deserialize;

use super::guarded_generate;
use crate::oracle::recovery::extract_json_array;
use crate::oracle::{recover_json, GenerationParams, Oracle};
use crate::prompts;
use crate::types::Product;

#[derive(Debug, Deserialize)]
struct WireValidation {
    #[serde(default)]
    productos_finales: Vec<String>,
    #[serde(default)]
    son_similares: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub final_products: Vec<Product>,
    /// True when the survivors only resemble what was asked for, so the
    /// reply should say "similar" instead of claiming an exact match.
    pub only_similar: bool,
}

/// Check the candidates against the utterance's explicit constraints.
pub async fn validate_specifications(
    oracle: &dyn Oracle,
    params: &GenerationParams,
    stage_timeout: Duration,
    utterance: &str,
    candidates: Vec<Product>,
    fallback_keep: usize,
) -> ValidationOutcome {
    if candidates.is_empty() {
        return ValidationOutcome {
            final_products: Vec::new(),
            only_similar: false,
        };
    }

    let prompt = prompts::validator_prompt(utterance, &candidates);

    let raw = match guarded_generate(oracle, &prompt, params, stage_timeout).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "validator oracle call failed, keeping leading candidates");
            return optimistic_fallback(candidates, fallback_keep);
        }
    };

    let wire = match recover_json::<WireValidation>(&raw) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::debug!(error = %e, "strict validation parse failed, trying lenient");
            match extract_json_array(&raw, "productos_finales") {
                Some(ids) => WireValidation {
                    productos_finales: ids,
                    son_similares: raw.contains("\"son_similares\": true")
                        || raw.contains("\"son_similares\":true"),
                },
                None => {
                    tracing::warn!("validation output unusable, keeping leading candidates");
                    return optimistic_fallback(candidates, fallback_keep);
                }
            }
        }
    };

    let final_products: Vec<Product> = candidates
        .iter()
        .filter(|p| wire.productos_finales.iter().any(|id| id == &p.id))
        .cloned()
        .collect();

    tracing::debug!(
        count = final_products.len(),
        only_similar = wire.son_similares,
        "specifications validated"
    );

    ValidationOutcome {
        final_products,
        only_similar: wire.son_similares,
    }
}

/// Prefer showing something plausible over showing nothing.
fn optimistic_fallback(mut candidates: Vec<Product>, keep: usize) -> ValidationOutcome {
    candidates.truncate(keep);
    ValidationOutcome {
        final_products: candidates,
        only_similar: false,
    }
}

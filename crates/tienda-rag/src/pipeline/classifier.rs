//! Intent classification.
//!
//! The oracle sees the utterance, the recent turns and the live taxonomy,
//! and answers with one of four intents. Parsing is three-tiered: strict
//! JSON recovery, then escape-aware field pulls from loose text, then the
//! fail-open default. A product question must never be dropped because the
//! oracle rambled, so every unparseable outcome becomes an unconstrained
//! `ProductQuery`.

use std::time::Duration;

use serde::Deserialize;

use super::guarded_generate;
use crate::oracle::recovery::{extract_json_array, extract_json_string};
use crate::oracle::{recover_json, GenerationParams, Oracle};
use crate::prompts::{self, DEFAULT_CLARIFICATION_QUESTION};
use crate::session::ConversationMessage;
use crate::taxonomy::Taxonomy;

/// What the user is asking for, as far as the pipeline is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Store questions and chit-chat, answered off the catalog path.
    OffTopic,
    /// Refines products already shown; ids come from the history markers,
    /// never from the oracle.
    FollowUp { product_ids: Vec<String> },
    /// Product wish too vague to search.
    NeedsClarification { question: String },
    /// Searchable query, possibly spanning several categories.
    ProductQuery {
        categories: Vec<String>,
        subcategories: Vec<String>,
    },
}

impl Intent {
    fn unconstrained() -> Self {
        Intent::ProductQuery {
            categories: Vec::new(),
            subcategories: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireClassification {
    #[serde(default)]
    intencion: String,
    #[serde(default)]
    categorias: Vec<String>,
    #[serde(default)]
    subcategorias: Vec<String>,
    #[serde(default)]
    pregunta: String,
}

/// Classify one utterance. `last_shown` carries the product ids from the
/// most recent marker in history and resolves follow-ups.
pub async fn classify(
    oracle: &dyn Oracle,
    params: &GenerationParams,
    stage_timeout: Duration,
    utterance: &str,
    history: &[ConversationMessage],
    taxonomy: &Taxonomy,
    last_shown: &[String],
) -> Intent {
    let prompt = prompts::classifier_prompt(utterance, history, taxonomy);

    let raw = match guarded_generate(oracle, &prompt, params, stage_timeout).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "classifier oracle call failed, assuming product query");
            return Intent::unconstrained();
        }
    };

    let wire = match recover_json::<WireClassification>(&raw) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::debug!(error = %e, "strict classification parse failed, trying lenient");
            lenient_wire(&raw)
        }
    };

    let intent = interpret(wire, last_shown);
    tracing::info!(intent = ?intent, "query classified");
    intent
}

/// Field-by-field salvage when the response is not one clean JSON object.
fn lenient_wire(raw: &str) -> WireClassification {
    let intencion = extract_json_string(raw, "intencion").unwrap_or_else(|| {
        for word in ["seguimiento", "aclaracion", "fuera_de_tema", "producto"] {
            if raw.contains(word) {
                return word.to_string();
            }
        }
        String::new()
    });

    WireClassification {
        intencion,
        categorias: extract_json_array(raw, "categorias").unwrap_or_default(),
        subcategorias: extract_json_array(raw, "subcategorias").unwrap_or_default(),
        pregunta: extract_json_string(raw, "pregunta").unwrap_or_default(),
    }
}

fn interpret(wire: WireClassification, last_shown: &[String]) -> Intent {
    match wire.intencion.as_str() {
        "fuera_de_tema" => Intent::OffTopic,
        "seguimiento" => {
            if last_shown.is_empty() {
                // Nothing on screen to refer back to, treat it as a fresh query
                tracing::debug!("follow-up without prior products, widening to product query");
                Intent::unconstrained()
            } else {
                Intent::FollowUp {
                    product_ids: last_shown.to_vec(),
                }
            }
        }
        "aclaracion" => {
            let question = if wire.pregunta.trim().is_empty() {
                DEFAULT_CLARIFICATION_QUESTION.to_string()
            } else {
                wire.pregunta
            };
            Intent::NeedsClarification { question }
        }
        _ => Intent::ProductQuery {
            categories: clean_labels(wire.categorias),
            subcategories: clean_labels(wire.subcategorias),
        },
    }
}

fn clean_labels(labels: Vec<String>) -> Vec<String> {
    labels
        .into_iter()
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .collect()
}

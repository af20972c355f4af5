//! Final reply generation.
//!
//! The oracle writes the prose, the code owns the facts. Whatever comes
//! back, the reply ships with a marker listing exactly the final product
//! ids: wrong or missing markers are rewritten mechanically. Product
//! existence is never left to generation.

use std::time::Duration;

use super::guarded_generate;
use crate::oracle::{GenerationParams, Oracle};
use crate::prompts;
use crate::session::ensure_marker;
use crate::types::Product;

/// Produce the user-facing reply for `products`. Infallible by design: an
/// oracle failure degrades to a canned line, and the marker is guaranteed
/// either way.
pub async fn synthesize(
    oracle: &dyn Oracle,
    params: &GenerationParams,
    stage_timeout: Duration,
    utterance: &str,
    products: &[Product],
    only_similar: bool,
    word_budget: usize,
) -> String {
    let ids: Vec<String> = products.iter().map(|p| p.id.clone()).collect();
    let prompt = prompts::synthesizer_prompt(utterance, products, only_similar, word_budget);

    let text = match guarded_generate(oracle, &prompt, params, stage_timeout).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            tracing::warn!("synthesizer returned empty text, using canned reply");
            prompts::synthesizer_fallback_text(only_similar).to_string()
        }
        Err(e) => {
            tracing::warn!(error = %e, "synthesizer oracle call failed, using canned reply");
            prompts::synthesizer_fallback_text(only_similar).to_string()
        }
    };

    ensure_marker(&text, &ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::extract_marker_ids;
    use crate::test_support::ScriptedOracle;
    use crate::types::{SizeOffer, Variation};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn make_product(id: &str, name: &str) -> Product {
        Product {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            category: "Conjuntos".to_string(),
            subcategory: "Bodies para bebé".to_string(),
            variations: vec![Variation {
                colors: vec!["azul".to_string()],
                image_url: String::new(),
                sizes: vec![SizeOffer {
                    label: "0-3m".to_string(),
                    quantity: 5,
                    price: 20.0,
                }],
            }],
            created_at: None,
            active: true,
        }
    }

    #[tokio::test]
    async fn test_compliant_reply_keeps_marker() {
        let oracle = ScriptedOracle::replying(&[
            "Tenemos el Body Osito a S/ 20.00. [PRODUCTOS:b1]",
        ]);
        let products = vec![make_product("b1", "Body Osito")];

        let reply = synthesize(
            &oracle,
            &GenerationParams::default(),
            TIMEOUT,
            "bodys para bebé",
            &products,
            false,
            40,
        )
        .await;

        assert_eq!(extract_marker_ids(&reply), vec!["b1".to_string()]);
        assert!(reply.contains("Body Osito"));
    }

    #[tokio::test]
    async fn test_wrong_marker_is_rewritten() {
        let oracle = ScriptedOracle::replying(&[
            "Tenemos dos opciones. [PRODUCTOS:ajeno-1,ajeno-2]",
        ]);
        let products = vec![
            make_product("b1", "Body Osito"),
            make_product("b2", "Body Lunita"),
        ];

        let reply = synthesize(
            &oracle,
            &GenerationParams::default(),
            TIMEOUT,
            "bodys",
            &products,
            false,
            40,
        )
        .await;

        assert_eq!(
            extract_marker_ids(&reply),
            vec!["b1".to_string(), "b2".to_string()]
        );
        assert!(!reply.contains("ajeno-1"));
    }

    #[tokio::test]
    async fn test_missing_marker_is_appended() {
        let oracle = ScriptedOracle::replying(&["Claro, tenemos el Body Osito a S/ 20.00."]);
        let products = vec![make_product("b1", "Body Osito")];

        let reply = synthesize(
            &oracle,
            &GenerationParams::default(),
            TIMEOUT,
            "bodys",
            &products,
            false,
            40,
        )
        .await;

        assert!(reply.ends_with("[PRODUCTOS:b1]"));
    }

    #[tokio::test]
    async fn test_oracle_failure_ships_canned_reply_with_marker() {
        let oracle = ScriptedOracle::failing();
        let products = vec![make_product("b1", "Body Osito")];

        let reply = synthesize(
            &oracle,
            &GenerationParams::default(),
            TIMEOUT,
            "bodys",
            &products,
            true,
            40,
        )
        .await;

        assert!(reply.contains("similares"));
        assert_eq!(extract_marker_ids(&reply), vec!["b1".to_string()]);
    }
}

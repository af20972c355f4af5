//! Request orchestration.
//!
//! [`StorefrontAssistant`] owns the catalog handle, the oracle and the
//! taxonomy cache, and drives one request through the pipeline:
//! classify, search, filter, validate, synthesize. Per-stage fallbacks make
//! the stages themselves infallible; anything unexpected that still escapes
//! is converted into one apologetic reply at the top, so the caller never
//! sees a raw error for a well-formed request.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;

use crate::catalog::CatalogStore;
use crate::config::AssistantConfig;
use crate::oracle::Oracle;
use crate::pipeline::{
    classify, filter_candidates, synthesize, validate_specifications, Intent,
};
use crate::prompts;
use crate::search::{search, search_categories, search_many, SearchFilter};
use crate::session::{
    extract_marker_ids, parse_history_json, strip_markers, ConversationMessage, ConversationState,
    ImageAttachment,
};
use crate::taxonomy::{Taxonomy, TaxonomyCache};
use crate::types::Product;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
}

/// One inbound chat turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    pub history: Vec<ConversationMessage>,
    pub image: Option<ImageAttachment>,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            history: Vec::new(),
            image: None,
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationMessage>) -> Self {
        self.history = history;
        self
    }

    /// History as the wire JSON array, parsed leniently.
    pub fn with_history_json(mut self, raw: &str) -> Self {
        self.history = parse_history_json(raw);
        self
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }
}

/// Assistant reply plus the product ids its marker references, so callers
/// can resolve product cards without re-parsing the text.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub product_ids: Vec<String>,
}

pub struct StorefrontAssistant {
    config: AssistantConfig,
    catalog: Arc<dyn CatalogStore>,
    oracle: Arc<dyn Oracle>,
    taxonomy: TaxonomyCache,
}

impl StorefrontAssistant {
    pub fn new(
        config: AssistantConfig,
        catalog: Arc<dyn CatalogStore>,
        oracle: Arc<dyn Oracle>,
    ) -> Self {
        let taxonomy = TaxonomyCache::new(
            catalog.clone(),
            Duration::from_secs(config.taxonomy.ttl_secs),
        );
        Self {
            config,
            catalog,
            oracle,
            taxonomy,
        }
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    /// Taxonomy cache handle, for callers that mutate the catalog and want
    /// to invalidate eagerly instead of waiting out the TTL.
    pub fn taxonomy(&self) -> &TaxonomyCache {
        &self.taxonomy
    }

    /// Answer one chat turn. Only a genuinely malformed request errors;
    /// everything downstream degrades into a usable reply.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        if request.prompt.trim().is_empty() {
            return Err(ChatError::EmptyPrompt);
        }

        tracing::info!(
            history_len = request.history.len(),
            has_image = request.image.is_some(),
            "chat turn received"
        );

        let state = ConversationState::from_messages(request.history.clone());
        let text = match self.run(&request, &state).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "pipeline failed unexpectedly");
                prompts::APOLOGY_REPLY.to_string()
            }
        };

        Ok(ChatReply {
            product_ids: extract_marker_ids(&text),
            text,
        })
    }

    async fn run(&self, request: &ChatRequest, state: &ConversationState) -> Result<String> {
        let utterance = request.prompt.trim();

        // First contact with nothing but a salutation gets the canned
        // welcome without spending an oracle call.
        if state.is_empty() && request.image.is_none() && prompts::is_bare_greeting(utterance) {
            tracing::debug!("bare greeting on empty history, sending welcome");
            return Ok(self.config.store.welcome_message.clone());
        }

        let taxonomy = self.taxonomy.get().await;
        let structured = self.config.oracle.structured.params();
        let stage_timeout = Duration::from_secs(self.config.oracle.stage_timeout_secs);

        let intent = classify(
            self.oracle.as_ref(),
            &structured,
            stage_timeout,
            utterance,
            &state.messages,
            &taxonomy,
            &state.last_shown_product_ids,
        )
        .await;

        match intent {
            Intent::OffTopic => Ok(self.general_reply(request, state).await),
            Intent::NeedsClarification { question } => Ok(question),
            Intent::FollowUp { product_ids } => {
                let products = self.resolve_products(&product_ids).await;
                if products.is_empty() {
                    tracing::debug!("no referenced product resolved, searching fresh");
                    self.product_query_reply(utterance, &taxonomy, Vec::new(), Vec::new())
                        .await
                } else {
                    Ok(self.validated_reply(utterance, products).await)
                }
            }
            Intent::ProductQuery {
                categories,
                subcategories,
            } => {
                self.product_query_reply(utterance, &taxonomy, categories, subcategories)
                    .await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Product branch
    // -----------------------------------------------------------------------

    async fn product_query_reply(
        &self,
        utterance: &str,
        taxonomy: &Taxonomy,
        categories: Vec<String>,
        subcategories: Vec<String>,
    ) -> Result<String> {
        let candidates = self
            .gather_candidates(utterance, categories, subcategories)
            .await;

        if candidates.is_empty() {
            tracing::info!("no candidates after all search attempts");
            return Ok(prompts::no_results_reply(
                utterance,
                taxonomy,
                self.config.reply.category_suggestion_cap,
            ));
        }

        let structured = self.config.oracle.structured.params();
        let stage_timeout = Duration::from_secs(self.config.oracle.stage_timeout_secs);

        let filtered = filter_candidates(
            self.oracle.as_ref(),
            &structured,
            stage_timeout,
            utterance,
            candidates,
            &self.config.filter,
        )
        .await;

        Ok(self.validated_reply(utterance, filtered).await)
    }

    /// Category fan-out first, widened with a free-text pass when the
    /// classifier's categories bring back too little.
    async fn gather_candidates(
        &self,
        utterance: &str,
        categories: Vec<String>,
        subcategories: Vec<String>,
    ) -> Vec<Product> {
        let mut candidates = if !categories.is_empty() {
            search_categories(
                self.catalog.as_ref(),
                &categories,
                self.config.search.category_fetch_limit,
            )
            .await
        } else if !subcategories.is_empty() {
            let filters = subcategories
                .into_iter()
                .map(|subcategory| SearchFilter {
                    subcategory: Some(subcategory),
                    limit: self.config.search.category_fetch_limit,
                    ..Default::default()
                })
                .collect();
            search_many(self.catalog.as_ref(), filters).await
        } else {
            Vec::new()
        };

        if candidates.len() < self.config.search.min_category_results {
            tracing::debug!(
                count = candidates.len(),
                "few category results, widening with text search"
            );
            let filter = SearchFilter {
                text: Some(utterance.to_string()),
                limit: self.config.search.text_fetch_limit,
                ..Default::default()
            };
            let widened = search(self.catalog.as_ref(), &filter).await;
            candidates = crate::search::merge_unique(vec![candidates, widened]);
        }

        tracing::debug!(count = candidates.len(), "candidates gathered");
        candidates
    }

    /// Validation plus synthesis, with the wipeout retry: when stated
    /// constraints eliminate every candidate, the leading candidates are
    /// re-presented as similar instead of answering empty-handed.
    async fn validated_reply(&self, utterance: &str, candidates: Vec<Product>) -> String {
        let structured = self.config.oracle.structured.params();
        let stage_timeout = Duration::from_secs(self.config.oracle.stage_timeout_secs);

        let outcome = validate_specifications(
            self.oracle.as_ref(),
            &structured,
            stage_timeout,
            utterance,
            candidates.clone(),
            self.config.reply.validator_fallback_keep,
        )
        .await;

        let (final_products, only_similar) = if outcome.final_products.is_empty() {
            tracing::debug!("validation wiped all candidates, re-presenting as similar");
            let mut keep = candidates;
            keep.truncate(self.config.reply.wipeout_retry_keep);
            (keep, true)
        } else {
            (outcome.final_products, outcome.only_similar)
        };

        synthesize(
            self.oracle.as_ref(),
            &structured,
            stage_timeout,
            utterance,
            &final_products,
            only_similar,
            self.config.reply.word_budget,
        )
        .await
    }

    /// Point-get every referenced id; ids that no longer resolve are
    /// dropped silently.
    async fn resolve_products(&self, ids: &[String]) -> Vec<Product> {
        let mut products = Vec::new();
        for id in ids {
            match self.catalog.get(id).await {
                Ok(Some(product)) => products.push(product),
                Ok(None) => {
                    tracing::debug!(id = %id, "referenced product no longer in catalog")
                }
                Err(e) => tracing::warn!(error = %e, id = %id, "catalog point-get failed"),
            }
        }
        products
    }

    // -----------------------------------------------------------------------
    // Off-topic branch
    // -----------------------------------------------------------------------

    /// Store questions and chit-chat. Oracle-backed with history and the
    /// optional image; degrades to the keyword FAQ, then to a generic line.
    /// Markers are stripped so this branch can never reference products.
    async fn general_reply(&self, request: &ChatRequest, state: &ConversationState) -> String {
        let system = prompts::general_system_prompt(&self.config.store);
        let params = self.config.oracle.conversational.params();
        let stage_timeout = Duration::from_secs(self.config.oracle.stage_timeout_secs);

        let result = tokio::time::timeout(
            stage_timeout,
            self.oracle.converse(
                &system,
                &state.messages,
                request.prompt.trim(),
                request.image.as_ref(),
                &params,
            ),
        )
        .await;

        let text = match result {
            Ok(Ok(text)) if !text.trim().is_empty() => text,
            Ok(Ok(_)) => {
                tracing::warn!("general reply came back empty, using FAQ fallback");
                self.general_fallback(&request.prompt)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "general oracle call failed, using FAQ fallback");
                self.general_fallback(&request.prompt)
            }
            Err(_) => {
                tracing::warn!("general oracle call timed out, using FAQ fallback");
                self.general_fallback(&request.prompt)
            }
        };

        strip_markers(&text)
    }

    fn general_fallback(&self, utterance: &str) -> String {
        prompts::faq_reply(&self.config.store, utterance)
            .unwrap_or_else(|| prompts::GENERAL_FALLBACK_REPLY.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::test_support::ScriptedOracle;
    use crate::types::{SizeOffer, Variation};
    use anyhow::anyhow;

    fn onesie(id: &str) -> Product {
        Product {
            id: id.to_string(),
            name: "Baby Onesie".to_string(),
            description: "Body suave de algodón para bebé".to_string(),
            category: "Conjuntos".to_string(),
            subcategory: "Bodies para bebé".to_string(),
            variations: vec![Variation {
                colors: vec!["blue".to_string()],
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

    fn polo(id: &str, stock: u32) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Polo {}", id),
            description: "Polo de algodón".to_string(),
            category: "Prendas superiores".to_string(),
            subcategory: "Polos infantiles".to_string(),
            variations: vec![Variation {
                colors: vec!["rojo".to_string()],
                image_url: String::new(),
                sizes: vec![SizeOffer {
                    label: "8".to_string(),
                    quantity: stock,
                    price: 15.0,
                }],
            }],
            created_at: None,
            active: true,
        }
    }

    fn assistant(catalog: InMemoryCatalog, oracle: ScriptedOracle) -> StorefrontAssistant {
        StorefrontAssistant::new(
            AssistantConfig::default(),
            Arc::new(catalog),
            Arc::new(oracle),
        )
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected_at_the_boundary() {
        let assistant = assistant(InMemoryCatalog::new(), ScriptedOracle::replying(&[]));

        let result = assistant.chat(ChatRequest::new("   ")).await;

        assert!(matches!(result, Err(ChatError::EmptyPrompt)));
    }

    #[tokio::test]
    async fn test_bare_greeting_gets_welcome_without_oracle() {
        let catalog = InMemoryCatalog::new();
        catalog.insert(onesie(""));
        let oracle = Arc::new(ScriptedOracle::replying(&[]));
        let assistant = StorefrontAssistant::new(
            AssistantConfig::default(),
            Arc::new(catalog),
            oracle.clone(),
        );

        let reply = assistant.chat(ChatRequest::new("¡Hola!")).await.unwrap();

        assert!(reply.text.contains("asistente virtual"));
        assert!(reply.product_ids.is_empty());
        assert_eq!(oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn test_product_query_end_to_end() {
        // Scenario: one matching onesie, classifier names its category,
        // small set skips the filter, validator and synthesizer comply.
        let catalog = InMemoryCatalog::new();
        catalog.insert_with_id(onesie("onesie-1"));
        let oracle = ScriptedOracle::replying(&[
            r#"{"intencion": "producto", "categorias": ["Conjuntos"], "subcategorias": ["Bodies para bebé"]}"#,
            r#"{"productos_finales": ["onesie-1"], "son_similares": false}"#,
            "Sí, tenemos el Baby Onesie a S/ 20.00. [PRODUCTOS:onesie-1]",
        ]);
        let assistant = assistant(catalog, oracle);

        let reply = assistant
            .chat(ChatRequest::new("tienen bodys para bebé"))
            .await
            .unwrap();

        assert!(reply.text.contains("20.00"));
        assert_eq!(reply.product_ids, vec!["onesie-1".to_string()]);
    }

    #[tokio::test]
    async fn test_off_topic_reply_never_carries_a_marker() {
        let catalog = InMemoryCatalog::new();
        catalog.insert(onesie(""));
        let oracle = ScriptedOracle::replying(&[
            r#"{"intencion": "fuera_de_tema"}"#,
            "Nos especializamos en ropa infantil, no vendemos zapatos de hombre. [PRODUCTOS:colado]",
        ]);
        let assistant = assistant(catalog, oracle);

        let reply = assistant
            .chat(ChatRequest::new("tienen zapatos de hombre"))
            .await
            .unwrap();

        assert!(reply.product_ids.is_empty());
        assert!(!reply.text.contains("[PRODUCTOS:"));
        assert!(reply.text.contains("ropa infantil"));
    }

    #[tokio::test]
    async fn test_follow_up_reuses_marker_ids_from_history() {
        let catalog = InMemoryCatalog::new();
        catalog.insert_with_id(onesie("abc123"));
        let oracle = ScriptedOracle::replying(&[
            r#"{"intencion": "seguimiento"}"#,
            r#"{"productos_finales": ["abc123"], "son_similares": false}"#,
            "El Baby Onesie está disponible en azul, no en rojo. [PRODUCTOS:abc123]",
        ]);
        let assistant = assistant(catalog, oracle);

        let history = vec![
            ConversationMessage::user("tienen bodys"),
            ConversationMessage::model("Sí, mira este. [PRODUCTOS:abc123]"),
        ];
        let reply = assistant
            .chat(ChatRequest::new("¿en rojo?").with_history(history))
            .await
            .unwrap();

        assert_eq!(reply.product_ids, vec!["abc123".to_string()]);
    }

    #[tokio::test]
    async fn test_zero_results_suggests_categories_without_marker() {
        let catalog = InMemoryCatalog::new();
        catalog.insert(onesie(""));
        let oracle = Arc::new(ScriptedOracle::replying(&[
            r#"{"intencion": "producto", "categorias": ["Juguetes"]}"#,
        ]));
        let assistant = StorefrontAssistant::new(
            AssistantConfig::default(),
            Arc::new(catalog),
            oracle.clone(),
        );

        let reply = assistant
            .chat(ChatRequest::new("venden monopatines"))
            .await
            .unwrap();

        assert!(reply.text.contains("Conjuntos"));
        assert!(reply.product_ids.is_empty());
        assert!(!reply.text.contains("[PRODUCTOS:"));
        // Only the classifier ran, no filter/validator/synthesizer calls
        assert_eq!(oracle.call_count(), 1);
    }

    #[tokio::test]
    async fn test_clarification_question_is_returned_verbatim() {
        let catalog = InMemoryCatalog::new();
        catalog.insert(onesie(""));
        let oracle = ScriptedOracle::replying(&[
            r#"{"intencion": "aclaracion", "pregunta": "¿Para qué edad lo buscas?"}"#,
        ]);
        let assistant = assistant(catalog, oracle);

        let reply = assistant.chat(ChatRequest::new("algo bonito")).await.unwrap();

        assert_eq!(reply.text, "¿Para qué edad lo buscas?");
        assert!(reply.product_ids.is_empty());
    }

    #[tokio::test]
    async fn test_filter_failure_still_reaches_a_valid_marker() {
        // Eight polos force the oracle filter; its failure degrades to the
        // top-stock prefix and the pipeline still completes.
        let catalog = InMemoryCatalog::new();
        for i in 0..8 {
            catalog.insert_with_id(polo(&format!("p{}", i), i as u32));
        }
        let oracle = ScriptedOracle::with_script(vec![
            Ok(r#"{"intencion": "producto", "categorias": ["Prendas superiores"]}"#.to_string()),
            Err(anyhow!("oracle down")),
            Ok(r#"{"productos_finales": ["p7", "p6"], "son_similares": false}"#.to_string()),
            Ok("Tenemos Polo p7 y Polo p6 a S/ 15.00. [PRODUCTOS:p7,p6]".to_string()),
        ]);
        let assistant = assistant(catalog, oracle);

        let reply = assistant.chat(ChatRequest::new("polos")).await.unwrap();

        assert_eq!(reply.product_ids, vec!["p7".to_string(), "p6".to_string()]);
    }

    #[tokio::test]
    async fn test_total_oracle_outage_still_answers_with_marker() {
        let catalog = InMemoryCatalog::new();
        for i in 0..4 {
            catalog.insert_with_id(polo(&format!("p{}", i), 3));
        }
        let assistant = assistant(catalog, ScriptedOracle::failing());

        let reply = assistant.chat(ChatRequest::new("polos")).await.unwrap();

        // Classifier failed open, text search found polos, validator kept a
        // prefix, synthesizer shipped the canned line with a real marker
        assert!(!reply.text.trim().is_empty());
        assert_eq!(
            reply.product_ids,
            vec!["p0".to_string(), "p1".to_string(), "p2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_validation_wipeout_re_presents_as_similar() {
        let catalog = InMemoryCatalog::new();
        catalog.insert_with_id(polo("p1", 3));
        catalog.insert_with_id(polo("p2", 3));
        let oracle = ScriptedOracle::replying(&[
            r#"{"intencion": "producto", "categorias": ["Prendas superiores"]}"#,
            r#"{"productos_finales": [], "son_similares": true}"#,
            "Tengo opciones parecidas en rojo.",
        ]);
        let assistant = assistant(catalog, oracle);

        let reply = assistant
            .chat(ChatRequest::new("polos morados talla 20"))
            .await
            .unwrap();

        // Marker appended mechanically over the re-presented candidates
        assert_eq!(
            reply.product_ids,
            vec!["p1".to_string(), "p2".to_string()]
        );
        assert!(reply.text.starts_with("Tengo opciones parecidas"));
    }

    #[tokio::test]
    async fn test_general_branch_degrades_to_faq() {
        let catalog = InMemoryCatalog::new();
        catalog.insert(onesie(""));
        let oracle = ScriptedOracle::with_script(vec![
            Ok(r#"{"intencion": "fuera_de_tema"}"#.to_string()),
            Err(anyhow!("oracle down")),
        ]);
        let assistant = assistant(catalog, oracle);

        let reply = assistant
            .chat(ChatRequest::new("¿cuál es el horario de atención?"))
            .await
            .unwrap();

        assert!(reply.text.contains("9:00"));
    }

    #[tokio::test]
    async fn test_follow_up_to_deleted_product_searches_fresh() {
        let catalog = InMemoryCatalog::new();
        catalog.insert_with_id(polo("p1", 3));
        let oracle = ScriptedOracle::replying(&[
            r#"{"intencion": "seguimiento"}"#,
            r#"{"productos_finales": ["p1"], "son_similares": false}"#,
            "Te puede interesar el Polo p1. [PRODUCTOS:p1]",
        ]);
        let assistant = assistant(catalog, oracle);

        // The marker references a product that no longer exists
        let history = vec![ConversationMessage::model("Mira. [PRODUCTOS:borrado-9]")];
        let reply = assistant
            .chat(ChatRequest::new("¿y en rojo? busco un polo").with_history(history))
            .await
            .unwrap();

        assert_eq!(reply.product_ids, vec!["p1".to_string()]);
    }
}

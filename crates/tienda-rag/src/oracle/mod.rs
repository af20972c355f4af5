//! Language-model access.
//!
//! The pipeline talks to a single [`Oracle`] trait so stages can be tested
//! against scripted fakes and the HTTP transport stays in one place.

use anyhow::Result;
use async_trait::async_trait;

use crate::session::{ConversationMessage, ImageAttachment};

pub mod gemini;
pub mod recovery;

pub use gemini::GeminiOracle;
pub use recovery::{recover_json, ParseFailure};

/// Sampling knobs for one oracle call. Structured stages run cold
/// (low temperature, narrow top-k) so answers stay parseable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.8,
            top_k: 10,
            max_tokens: 1024,
        }
    }
}

#[async_trait]
pub trait Oracle: Send + Sync {
    /// One-shot completion for a standalone prompt.
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;

    /// Multi-turn completion with a system instruction, prior history and an
    /// optional inline image on the final user turn.
    async fn converse(
        &self,
        system: &str,
        history: &[ConversationMessage],
        prompt: &str,
        image: Option<&ImageAttachment>,
        params: &GenerationParams,
    ) -> Result<String>;
}

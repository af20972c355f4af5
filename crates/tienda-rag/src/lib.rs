pub mod catalog;
pub mod config;
pub mod engine;
pub mod oracle;
pub mod pipeline;
pub mod prompts;
pub mod search;
pub mod session;
pub mod taxonomy;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export primary types for convenience
pub use config::AssistantConfig;
pub use engine::{ChatError, ChatReply, ChatRequest, StorefrontAssistant};
pub use types::{Product, SizeOffer, Variation};

// Re-export the pipeline surface
pub use catalog::{CatalogQuery, CatalogStore, InMemoryCatalog};
pub use oracle::{GeminiOracle, GenerationParams, Oracle};
pub use pipeline::Intent;
pub use prompts::StoreProfile;
pub use search::SearchFilter;
pub use session::{ConversationMessage, ImageAttachment, Role};
pub use taxonomy::TaxonomyCache;

// Re-export common types
pub use anyhow::{Error, Result};
pub use uuid::Uuid;

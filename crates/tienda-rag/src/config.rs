use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::oracle::GenerationParams;
use crate::prompts::StoreProfile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub oracle: OracleConfig,
    pub search: SearchTuning,
    pub taxonomy: TaxonomyConfig,
    pub filter: FilterTuning,
    pub reply: ReplyTuning,
    pub store: StoreProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    pub model: String,
    /// Sampling for the structured stages (classify, filter, validate,
    /// synthesize). Cold on purpose, output must stay parseable.
    pub structured: SamplingConfig,
    /// Sampling for conversational store-info answers.
    pub conversational: SamplingConfig,
    pub stage_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_tokens: u32,
}

impl SamplingConfig {
    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTuning {
    /// Store fetch ceiling for each per-category search.
    pub category_fetch_limit: usize,
    /// Store fetch ceiling for the free-text widening pass.
    pub text_fetch_limit: usize,
    /// Below this many category hits, widen with a free-text search.
    pub min_category_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterTuning {
    /// At or below this many candidates the oracle filter is skipped.
    pub skip_threshold: usize,
    /// Selection cap the oracle is instructed to respect.
    pub max_selected: usize,
    /// Candidates kept (top by stock) when the oracle filter fails.
    pub fallback_keep: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyTuning {
    /// Word budget the synthesizer is instructed to respect.
    pub word_budget: usize,
    /// Categories named in the zero-result reply.
    pub category_suggestion_cap: usize,
    /// Candidates kept when the validator oracle call fails.
    pub validator_fallback_keep: usize,
    /// Candidates re-presented as similar when validation wipes everything.
    pub wipeout_retry_keep: usize,
}

impl AssistantConfig {
    /// Validate config values, returning errors for clearly broken
    /// configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.oracle.model.trim().is_empty() {
            return Err("oracle.model must not be empty".into());
        }
        for (label, sampling) in [
            ("oracle.structured", &self.oracle.structured),
            ("oracle.conversational", &self.oracle.conversational),
        ] {
            if !(0.0..=2.0).contains(&sampling.temperature) {
                return Err(format!("{}.temperature must be in [0.0, 2.0]", label));
            }
            if !(0.0..=1.0).contains(&sampling.top_p) {
                return Err(format!("{}.top_p must be in [0.0, 1.0]", label));
            }
            if sampling.max_tokens == 0 {
                return Err(format!("{}.max_tokens must be > 0", label));
            }
        }
        if self.oracle.stage_timeout_secs == 0 {
            return Err("oracle.stage_timeout_secs must be > 0".into());
        }
        if self.search.category_fetch_limit == 0 {
            return Err("search.category_fetch_limit must be > 0".into());
        }
        if self.search.text_fetch_limit == 0 {
            return Err("search.text_fetch_limit must be > 0".into());
        }
        if self.taxonomy.ttl_secs == 0 {
            return Err("taxonomy.ttl_secs must be > 0".into());
        }
        if self.filter.max_selected == 0 {
            return Err("filter.max_selected must be > 0".into());
        }
        if self.filter.fallback_keep == 0 {
            return Err("filter.fallback_keep must be > 0".into());
        }
        if self.reply.word_budget == 0 {
            return Err("reply.word_budget must be > 0".into());
        }
        if self.reply.validator_fallback_keep == 0 {
            return Err("reply.validator_fallback_keep must be > 0".into());
        }
        if self.reply.wipeout_retry_keep == 0 {
            return Err("reply.wipeout_retry_keep must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            oracle: OracleConfig {
                model: crate::oracle::gemini::DEFAULT_MODEL.to_string(),
                structured: SamplingConfig {
                    temperature: 0.1,
                    top_p: 0.8,
                    top_k: 10,
                    max_tokens: 1024,
                },
                conversational: SamplingConfig {
                    temperature: 0.2,
                    top_p: 0.8,
                    top_k: 10,
                    max_tokens: 1024,
                },
                stage_timeout_secs: 25,
            },
            search: SearchTuning {
                category_fetch_limit: 50,
                text_fetch_limit: 20,
                min_category_results: 3,
            },
            taxonomy: TaxonomyConfig { ttl_secs: 3600 },
            filter: FilterTuning {
                skip_threshold: 6,
                max_selected: 6,
                fallback_keep: 4,
            },
            reply: ReplyTuning {
                word_budget: 40,
                category_suggestion_cap: 5,
                validator_fallback_keep: 3,
                wipeout_retry_keep: 3,
            },
            store: StoreProfile::default(),
        }
    }
}

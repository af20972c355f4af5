//! The product-resolution pipeline.
//!
//! One request moves through classify, search, filter, validate, synthesize
//! in that order. Every oracle-backed stage owns a deterministic fallback so
//! a flaky oracle degrades precision, never availability.

use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::oracle::{GenerationParams, Oracle};

pub mod candidate_filter;
pub mod classifier;
pub mod spec_validator;
pub mod synthesizer;

pub use candidate_filter::filter_candidates;
pub use classifier::{classify, Intent};
pub use spec_validator::{validate_specifications, ValidationOutcome};
pub use synthesizer::synthesize;

/// One-shot oracle call with a hard per-stage deadline. A hung call turns
/// into an error the stage's fallback path absorbs.
pub(crate) async fn guarded_generate(
    oracle: &dyn Oracle,
    prompt: &str,
    params: &GenerationParams,
    limit: Duration,
) -> Result<String> {
    match tokio::time::timeout(limit, oracle.generate(prompt, params)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("oracle call exceeded {}s", limit.as_secs())),
    }
}

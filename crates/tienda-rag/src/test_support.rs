//! Shared fakes for unit tests.

use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::oracle::{GenerationParams, Oracle};
use crate::session::{ConversationMessage, ImageAttachment};

/// Oracle that replays a scripted sequence of outcomes and records every
/// prompt it was shown.
pub(crate) struct ScriptedOracle {
    script: Mutex<VecDeque<Result<String>>>,
    seen: Mutex<Vec<String>>,
    fail_all: bool,
}

impl ScriptedOracle {
    pub(crate) fn with_script(script: Vec<Result<String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
            fail_all: false,
        }
    }

    pub(crate) fn replying(texts: &[&str]) -> Self {
        Self::with_script(texts.iter().map(|t| Ok((*t).to_string())).collect())
    }

    pub(crate) fn failing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
            fail_all: true,
        }
    }

    pub(crate) fn call_count(&self) -> usize {
        self.seen.lock().len()
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.seen.lock().clone()
    }

    fn next(&self, prompt: &str) -> Result<String> {
        self.seen.lock().push(prompt.to_string());
        if self.fail_all {
            return Err(anyhow!("scripted oracle failure"));
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("oracle script exhausted")))
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        self.next(prompt)
    }

    async fn converse(
        &self,
        _system: &str,
        _history: &[ConversationMessage],
        prompt: &str,
        _image: Option<&ImageAttachment>,
        _params: &GenerationParams,
    ) -> Result<String> {
        self.next(prompt)
    }
}

//! Conversation history and the product marker protocol.
//!
//! Every assistant reply that presents products carries a trailing
//! `[PRODUCTOS:id1,id2]` marker. The marker is how the UI resolves product
//! cards and how follow-up turns ("quiero el segundo") recover what was on
//! screen, so the helpers here treat it as data, not prose.

use std::sync::LazyLock;

use bytes::Bytes;
use regex::Regex;
use serde::{Deserialize, Serialize};

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[PRODUCTOS:([^\]]*)\]").expect("product marker regex is valid"));

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Speaker tags follow the oracle wire convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub text: String,
}

impl ConversationMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Inline image sent alongside a prompt.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data: Bytes,
}

// ---------------------------------------------------------------------------
// Marker protocol
// ---------------------------------------------------------------------------

/// Ids carried by the markers in `text`, first occurrence order, deduped.
pub fn extract_marker_ids(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for capture in MARKER_RE.captures_iter(text) {
        for id in capture[1].split(',') {
            let id = id.trim();
            if !id.is_empty() && !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}

/// Remove every marker and trim the leftover whitespace.
pub fn strip_markers(text: &str) -> String {
    MARKER_RE.replace_all(text, "").trim().to_string()
}

/// Rewrite `text` so it carries exactly one marker listing exactly `ids`.
/// Whatever markers the oracle produced are discarded first; an empty id set
/// yields marker-free text.
pub fn ensure_marker(text: &str, ids: &[String]) -> String {
    let body = strip_markers(text);
    if ids.is_empty() {
        return body;
    }
    format!("{}\n\n[PRODUCTOS:{}]", body, ids.join(","))
}

// ---------------------------------------------------------------------------
// Conversation state
// ---------------------------------------------------------------------------

/// History plus the product ids shown by the most recent assistant reply.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub messages: Vec<ConversationMessage>,
    pub last_shown_product_ids: Vec<String>,
}

impl ConversationState {
    pub fn from_messages(messages: Vec<ConversationMessage>) -> Self {
        let last_shown_product_ids = last_marker_ids(&messages);
        Self {
            messages,
            last_shown_product_ids,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Ids from the most recent model message that carries a marker.
pub fn last_marker_ids(messages: &[ConversationMessage]) -> Vec<String> {
    for message in messages.iter().rev() {
        if message.role != Role::Model {
            continue;
        }
        let ids = extract_marker_ids(&message.text);
        if !ids.is_empty() {
            return ids;
        }
    }
    Vec::new()
}

/// Parse a history payload leniently. The strict shape is an array of
/// `{"role": "user"|"model", "text": "..."}`; off-shape entries are salvaged
/// from a `content` field when possible and dropped otherwise. A payload that
/// is not a JSON array at all yields an empty history.
pub fn parse_history_json(raw: &str) -> Vec<ConversationMessage> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    if let Ok(messages) = serde_json::from_str::<Vec<ConversationMessage>>(raw) {
        return messages;
    }

    let items: Vec<serde_json::Value> = match serde_json::from_str(raw) {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(error = %e, "discarding unparseable conversation history");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| {
            let role = match item.get("role").and_then(|r| r.as_str()) {
                Some("user") => Role::User,
                Some("model") | Some("assistant") => Role::Model,
                _ => return None,
            };
            let text = item
                .get("text")
                .or_else(|| item.get("content"))
                .and_then(|t| t.as_str())?;
            Some(ConversationMessage {
                role,
                text: text.to_string(),
            })
        })
        .collect()
}

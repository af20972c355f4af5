//! Google Gemini transport.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{GenerationParams, Oracle};
use crate::session::{ConversationMessage, ImageAttachment, Role};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

pub struct GeminiOracle {
    api_key: String,
    model: String,
    client: Client,
}

impl GeminiOracle {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(120))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            api_key,
            model,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        )
    }

    async fn post(&self, body: &serde_json::Value) -> Result<String> {
        let endpoint = self.endpoint();

        let response = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("Request to {} timed out, check network connectivity", endpoint)
                } else if e.is_connect() {
                    anyhow!("Failed to connect to {}: {}", endpoint, e)
                } else {
                    anyhow!("Request to {} failed: {}", endpoint, e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await?;
            return Err(anyhow!("Gemini API error ({}): {}", status, error));
        }

        let result: GeminiResponse = parse_json_response(response, &endpoint).await?;
        if let Some(candidate) = result.candidates.first() {
            if let Some(part) = candidate.content.parts.first() {
                return Ok(part.text.clone());
            }
        }

        Err(anyhow!("Gemini returned no candidates"))
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        self.post(&build_generate_body(prompt, params)).await
    }

    async fn converse(
        &self,
        system: &str,
        history: &[ConversationMessage],
        prompt: &str,
        image: Option<&ImageAttachment>,
        params: &GenerationParams,
    ) -> Result<String> {
        self.post(&build_converse_body(system, history, prompt, image, params))
            .await
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

fn generation_config(params: &GenerationParams) -> serde_json::Value {
    json!({
        "temperature": params.temperature,
        "topP": params.top_p,
        "topK": params.top_k,
        "maxOutputTokens": params.max_tokens,
    })
}

pub(crate) fn build_generate_body(prompt: &str, params: &GenerationParams) -> serde_json::Value {
    json!({
        "contents": [{
            "parts": [{"text": prompt}]
        }],
        "generationConfig": generation_config(params),
    })
}

pub(crate) fn build_converse_body(
    system: &str,
    history: &[ConversationMessage],
    prompt: &str,
    image: Option<&ImageAttachment>,
    params: &GenerationParams,
) -> serde_json::Value {
    let mut contents: Vec<serde_json::Value> = history
        .iter()
        .map(|message| {
            json!({
                "role": wire_role(message.role),
                "parts": [{"text": message.text}]
            })
        })
        .collect();

    let mut parts = vec![json!({"text": prompt})];
    if let Some(image) = image {
        parts.push(json!({
            "inlineData": {
                "mimeType": image.mime_type,
                "data": STANDARD.encode(&image.data),
            }
        }));
    }
    contents.push(json!({"role": "user", "parts": parts}));

    json!({
        "systemInstruction": {
            "parts": [{"text": system}]
        },
        "contents": contents,
        "generationConfig": generation_config(params),
    })
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "model",
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Parse a response body as JSON, returning a clear error if the server
/// returned HTML.
async fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;

    let trimmed = body.trim_start();
    if trimmed.starts_with('<') || trimmed.starts_with("<!") {
        let preview: String = trimmed.chars().take(200).collect();
        return Err(anyhow!(
            "Endpoint {} returned HTML instead of JSON (HTTP {}), service may be down. Response: {}",
            endpoint,
            status,
            preview
        ));
    }

    serde_json::from_str::<T>(&body).map_err(|e| {
        let preview: String = body.chars().take(300).collect();
        anyhow!(
            "Failed to parse JSON from {} (HTTP {}): {}. Body: {}",
            endpoint,
            status,
            e,
            preview
        )
    })
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_generate_body_carries_sampling_params() {
        let params = GenerationParams {
            temperature: 0.1,
            top_p: 0.8,
            top_k: 10,
            max_tokens: 1024,
        };
        let body = build_generate_body("hola", &params);

        assert_eq!(body["contents"][0]["parts"][0]["text"], "hola");
        assert_eq!(body["generationConfig"]["topK"], 10);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_converse_body_orders_history_before_prompt() {
        let history = vec![
            ConversationMessage::user("hola"),
            ConversationMessage::model("buenas tardes"),
        ];
        let body = build_converse_body(
            "eres un asistente",
            &history,
            "busco un regalo",
            None,
            &GenerationParams::default(),
        );

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "eres un asistente");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][2]["parts"][0]["text"], "busco un regalo");
    }

    #[test]
    fn test_converse_body_inlines_image_on_final_turn() {
        let image = ImageAttachment {
            mime_type: "image/jpeg".to_string(),
            data: Bytes::from_static(b"fotobytes"),
        };
        let body = build_converse_body(
            "sistema",
            &[],
            "¿tienen algo así?",
            Some(&image),
            &GenerationParams::default(),
        );

        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[1]["inlineData"]["data"], STANDARD.encode(b"fotobytes"));
    }

    #[test]
    fn test_gemini_response_shape_parses() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"hola"}]}}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.candidates[0].content.parts[0].text, "hola");
    }
}

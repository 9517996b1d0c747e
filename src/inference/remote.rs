//! Remote backend: Gemini `generateContent`.
//!
//! Stateless per call. Every failure (network, 401/403, 429, malformed
//! body, blocked prompt) comes back as [`GenerationError::Failed`] with a
//! readable reason; nothing is retried.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use docqa_core::backend::{Credential, GenerationError, InferenceBackend};

use crate::config::RemoteConfig;

pub struct RemoteBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    credential: Credential,
}

impl RemoteBackend {
    pub fn new(config: &RemoteConfig, credential: Credential) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Failed(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/models/{}:generateContent",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
            model: config.model.clone(),
            credential,
        })
    }

    /// Build from a raw key. Blank keys are [`GenerationError::MissingCredential`].
    pub fn from_key(config: &RemoteConfig, api_key: &str) -> Result<Self, GenerationError> {
        let credential = Credential::new(api_key).ok_or(GenerationError::MissingCredential)?;
        Self::new(config, credential)
    }
}

fn status_reason(status: reqwest::StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());
    match status.as_u16() {
        401 | 403 => format!("authentication rejected ({}): {}", status, detail),
        429 => format!("quota exceeded ({}): {}", status, detail),
        _ => format!("remote API error {}: {}", status, detail),
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_generate_response(json: &Value) -> Result<String, GenerationError> {
    if let Some(reason) = json["promptFeedback"]["blockReason"].as_str() {
        return Err(GenerationError::Failed(format!("prompt blocked: {}", reason)));
    }
    let parts = json["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| GenerationError::Failed("response has no candidates".to_string()))?;
    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if text.is_empty() {
        let finish = json["candidates"][0]["finishReason"]
            .as_str()
            .unwrap_or("unknown");
        return Err(GenerationError::Failed(format!(
            "empty response (finish reason: {})",
            finish
        )));
    }
    Ok(text)
}

#[async_trait]
impl InferenceBackend for RemoteBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", self.credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Failed(format!("network error: {}", e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GenerationError::Failed(format!("network error: {}", e)))?;
        if !status.is_success() {
            return Err(GenerationError::Failed(status_reason(status, &text)));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Failed(format!("malformed response: {}", e)))?;
        let answer = parse_generate_response(&json)?;
        debug!(model = %self.model, chars = answer.len(), "remote generation finished");
        Ok(answer)
    }
}

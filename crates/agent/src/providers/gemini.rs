use async_trait::async_trait;
use serde_json::{json, Value};

use finchat_core::domain::conversation::Role;

use crate::llm::{LlmClient, LlmRequest, ProviderError};
use crate::providers::normalize_base_url;

/// Google `generateContent` client. The key travels in the
/// `x-goog-api-key` header so it never shows up in request URLs or logs.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: String, model: &str) -> Self {
        Self { http, base_url: normalize_base_url(base_url), api_key, model: model.to_string() }
    }

    fn request_body(&self, request: &LlmRequest) -> Value {
        let contents: Vec<Value> = request
            .messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    Role::Assistant => "model",
                    Role::User | Role::System => "user",
                };
                json!({ "role": role, "parts": [{ "text": message.content }] })
            })
            .collect();

        json!({
            "systemInstruction": { "parts": [{ "text": request.system }] },
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
                "responseMimeType": "application/json",
            },
        })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<String, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        tracing::debug!(
            event_name = "llm.request",
            provider = self.name(),
            model = %self.model,
            messages = request.messages.len(),
            "calling generateContent"
        );

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|error| ProviderError::network(&error))?;
        let status = response.status();
        let text = response.text().await.map_err(|error| ProviderError::network(&error))?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }

        let data: Value = serde_json::from_str(&text).map_err(|error| {
            ProviderError::invalid_response(format!("generateContent answer is not JSON: {error}"))
        })?;
        let Some(candidate) = data["candidates"].get(0) else {
            let block_reason =
                data["promptFeedback"]["blockReason"].as_str().unwrap_or("no candidates");
            return Err(ProviderError::invalid_response(format!(
                "gemini returned no candidates: {block_reason}"
            )));
        };

        let text: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter(|part| !part["thought"].as_bool().unwrap_or(false))
                    .filter_map(|part| part["text"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ProviderError::invalid_response("gemini candidate has no text parts"));
        }
        Ok(text)
    }
}

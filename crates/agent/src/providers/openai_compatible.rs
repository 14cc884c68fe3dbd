use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmRequest, ProviderError};
use crate::providers::{normalize_base_url, openai_role};

/// `chat/completions` client for OpenAI and for Ollama's OpenAI endpoint.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        model: &str,
    ) -> Self {
        Self {
            http,
            base_url: normalize_base_url(base_url),
            api_key: api_key.filter(|key| !key.is_empty()),
            model: model.to_string(),
        }
    }

    fn request_body(&self, request: &LlmRequest) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": request.system })];
        messages.extend(request.messages.iter().map(|message| {
            json!({ "role": openai_role(message.role), "content": message.content })
        }));

        json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "response_format": { "type": "json_object" },
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.http.post(&url).json(&self.request_body(request));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        tracing::debug!(
            event_name = "llm.request",
            provider = self.name(),
            model = %self.model,
            messages = request.messages.len(),
            "calling chat completions"
        );

        let response = builder.send().await.map_err(|error| ProviderError::network(&error))?;
        let status = response.status();
        let text = response.text().await.map_err(|error| ProviderError::network(&error))?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }

        let data: Value = serde_json::from_str(&text).map_err(|error| {
            ProviderError::invalid_response(format!("chat completion is not JSON: {error}"))
        })?;
        data["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::invalid_response("chat completion has no message content"))
    }
}

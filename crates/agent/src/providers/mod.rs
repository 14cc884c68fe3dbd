use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;

use finchat_core::config::{LlmConfig, LlmProvider};
use finchat_core::domain::conversation::Role;

use crate::llm::{LlmClient, ProviderError};

pub mod gemini;
pub mod openai_compatible;

pub use gemini::GeminiClient;
pub use openai_compatible::OpenAiCompatibleClient;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Builds the provider client once at startup. The returned client owns a
/// pooled `reqwest::Client` and is shared by every turn.
pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, ProviderError> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|error| ProviderError::network(&error))?;
    let api_key =
        config.api_key.as_ref().map(|key| key.expose_secret().to_string()).unwrap_or_default();

    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::Gemini => Arc::new(GeminiClient::new(
            http,
            config.base_url.as_deref().unwrap_or(GEMINI_BASE_URL),
            api_key,
            &config.model,
        )),
        LlmProvider::OpenAi => Arc::new(OpenAiCompatibleClient::new(
            http,
            config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL),
            Some(api_key),
            &config.model,
        )),
        LlmProvider::Ollama => Arc::new(OpenAiCompatibleClient::new(
            http,
            config.base_url.as_deref().unwrap_or_default(),
            None,
            &config.model,
        )),
    };

    tracing::info!(
        event_name = "llm.client_built",
        provider = config.provider.as_str(),
        model = %config.model,
        "llm client ready"
    );
    Ok(client)
}

fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Role name used by OpenAI-style chat APIs.
fn openai_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

use async_trait::async_trait;
use thiserror::Error;

use finchat_core::domain::conversation::ChatMessage;

/// One completion request: a system instruction followed by the bounded
/// conversation history, oldest message first.
#[derive(Clone, Debug, PartialEq)]
pub struct LlmRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the raw text of the first candidate answer.
    async fn complete(&self, request: &LlmRequest) -> Result<String, ProviderError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 401/403.
    Auth,
    /// 402, quota exhausted.
    Billing,
    RateLimit,
    /// Unknown model or endpoint.
    NotFound,
    Timeout,
    /// Connection refused, DNS failure, reset.
    Network,
    ServerError,
    /// A 2xx answer whose envelope could not be read.
    InvalidResponse,
    Unknown,
}

/// Classified transport/provider failure. `message` carries detail for logs
/// only and is never shown to the user.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("provider error ({kind:?}, status {status:?}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

const MAX_BODY_CHARS: usize = 500;

impl ProviderError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            402 => ProviderErrorKind::Billing,
            404 => ProviderErrorKind::NotFound,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimit,
            500..=599 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        };
        Self { kind, status: Some(status), message: truncate_body(body) }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind =
            if err.is_timeout() { ProviderErrorKind::Timeout } else { ProviderErrorKind::Network };
        Self { kind, status: None, message: err.to_string() }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self { kind: ProviderErrorKind::InvalidResponse, status: None, message: message.into() }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimit
                | ProviderErrorKind::Timeout
                | ProviderErrorKind::Network
                | ProviderErrorKind::ServerError
        )
    }
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_BODY_CHARS {
        return body.to_string();
    }
    let mut truncated: String = body.chars().take(MAX_BODY_CHARS).collect();
    truncated.push_str("...");
    truncated
}

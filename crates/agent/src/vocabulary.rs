use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use finchat_core::config::FinanceConfig;
use finchat_core::domain::vocabulary::{Vocabularies, Vocabulary, VocabularyKind};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VocabularyError {
    #[error("finance store request failed: {0}")]
    Transport(String),
    #[error("finance store answered status {status}")]
    Status { status: u16 },
    #[error("vocabulary page could not be decoded: {0}")]
    Decode(String),
}

impl VocabularyError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// Read side of the finance store. Implementations may retry; callers fall
/// back to the built-in lists on error.
#[async_trait]
pub trait VocabularySource: Send + Sync {
    async fn fetch(&self, kind: VocabularyKind) -> Result<Vocabulary, VocabularyError>;
}

/// Exponential backoff for idempotent reads. Writes are never retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FinanceConfig) -> Self {
        Self {
            retries: config.read_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    pub fn none() -> Self {
        Self { retries: 0, base_delay: Duration::ZERO, max_delay: Duration::ZERO }
    }

    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.base_delay;
        for _ in 1..attempt {
            delay = delay.saturating_mul(2);
            if delay >= self.max_delay {
                break;
            }
        }
        delay.min(self.max_delay)
    }
}

/// Fetches the three vocabularies concurrently, substituting the built-in
/// list for each one that fails or comes back empty.
pub async fn load_vocabularies(source: &dyn VocabularySource) -> Vocabularies {
    let (categories, payment_methods, payment_owners) = tokio::join!(
        source.fetch(VocabularyKind::Category),
        source.fetch(VocabularyKind::PaymentMethod),
        source.fetch(VocabularyKind::PaymentOwner),
    );

    let mut vocabularies = Vocabularies::fallback();
    for (kind, fetched) in [
        (VocabularyKind::Category, categories),
        (VocabularyKind::PaymentMethod, payment_methods),
        (VocabularyKind::PaymentOwner, payment_owners),
    ] {
        match fetched {
            Ok(vocabulary) if !vocabulary.is_empty() => vocabularies.set(kind, vocabulary),
            Ok(_) => tracing::warn!(
                event_name = "vocabulary.fallback",
                vocabulary = kind.as_str(),
                reason = "empty",
                "finance store returned no entries; using built-in list"
            ),
            Err(error) => tracing::warn!(
                event_name = "vocabulary.fallback",
                vocabulary = kind.as_str(),
                error = %error,
                "vocabulary fetch failed; using built-in list"
            ),
        }
    }
    vocabularies
}

/// Source that always serves the built-in lists.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticVocabularySource;

#[async_trait]
impl VocabularySource for StaticVocabularySource {
    async fn fetch(&self, kind: VocabularyKind) -> Result<Vocabulary, VocabularyError> {
        Ok(Vocabularies::fallback().get(kind).clone())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use finchat_core::domain::vocabulary::{Vocabulary, VocabularyEntry, VocabularyKind};

    use super::{load_vocabularies, RetryPolicy, VocabularyError, VocabularySource};

    #[test]
    fn backoff_doubles_until_the_cap() {
        let policy = RetryPolicy {
            retries: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(1_000),
        };

        let delays: Vec<u128> =
            (1..=5).map(|attempt| policy.delay_for(attempt).as_millis()).collect();
        assert_eq!(delays, vec![200, 400, 800, 1_000, 1_000]);
    }

    struct PartialSource;

    #[async_trait]
    impl VocabularySource for PartialSource {
        async fn fetch(&self, kind: VocabularyKind) -> Result<Vocabulary, VocabularyError> {
            match kind {
                VocabularyKind::Category => {
                    Ok(Vocabulary::new([VocabularyEntry::new("viagem", "Viagem")]))
                }
                VocabularyKind::PaymentMethod => Err(VocabularyError::Status { status: 503 }),
                VocabularyKind::PaymentOwner => Ok(Vocabulary::new(Vec::new())),
            }
        }
    }

    #[tokio::test]
    async fn failed_or_empty_vocabularies_fall_back_individually() {
        let vocabularies = load_vocabularies(&PartialSource).await;

        assert_eq!(vocabularies.categories.keys(), vec!["viagem"]);
        assert!(vocabularies.payment_methods.contains("itau"));
        assert!(vocabularies.payment_owners.contains("lailla"));
    }
}

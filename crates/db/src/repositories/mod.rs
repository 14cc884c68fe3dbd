use async_trait::async_trait;
use thiserror::Error;

use finchat_core::domain::conversation::{ChatMessage, ConversationState, SessionId};
use finchat_core::domain::record::PartialRecord;

pub mod conversation;
pub mod memory;

pub use conversation::SqlConversationRepository;
pub use memory::InMemoryConversationRepository;

pub const DEFAULT_HISTORY_WINDOW: u32 = 20;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("session `{0}` does not exist")]
    SessionNotFound(SessionId),
}

/// What happens to the pending record when a turn is flushed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingUpdate {
    Keep,
    Save { record: PartialRecord, awaiting_fields: Vec<String> },
    /// Record committed downstream; the session is retired.
    Clear,
}

/// Everything one turn writes, applied atomically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnWrite {
    /// Insert the session row in the same transaction instead of requiring
    /// an existing one. Set on the first turn of a conversation.
    pub create_session: bool,
    pub messages: Vec<ChatMessage>,
    pub pending: PendingUpdate,
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Loads the session with its most recent history, oldest first.
    async fn load(&self, id: &SessionId) -> Result<Option<ConversationState>, RepositoryError>;

    async fn create(&self) -> Result<ConversationState, RepositoryError>;

    async fn append_message(
        &self,
        id: &SessionId,
        message: ChatMessage,
    ) -> Result<(), RepositoryError>;

    async fn save_pending(
        &self,
        id: &SessionId,
        record: &PartialRecord,
        awaiting_fields: &[String],
    ) -> Result<(), RepositoryError>;

    /// Deletes the session and its messages.
    async fn clear(&self, id: &SessionId) -> Result<(), RepositoryError>;

    /// Last `limit` messages in chronological order.
    async fn recent_messages(
        &self,
        id: &SessionId,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError>;

    async fn record_turn(&self, id: &SessionId, write: TurnWrite) -> Result<(), RepositoryError>;
}

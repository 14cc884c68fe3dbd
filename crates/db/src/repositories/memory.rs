use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use finchat_core::domain::conversation::{ChatMessage, ConversationState, SessionId};
use finchat_core::domain::record::PartialRecord;

use super::{
    ConversationRepository, PendingUpdate, RepositoryError, TurnWrite, DEFAULT_HISTORY_WINDOW,
};

/// Process-local store used by tests. Keeps the full message log and applies
/// the history window on read, like the SQL store.
pub struct InMemoryConversationRepository {
    sessions: RwLock<HashMap<SessionId, ConversationState>>,
    history_window: u32,
}

impl Default for InMemoryConversationRepository {
    fn default() -> Self {
        Self { sessions: RwLock::new(HashMap::new()), history_window: DEFAULT_HISTORY_WINDOW }
    }
}

impl InMemoryConversationRepository {
    pub fn with_history_window(mut self, history_window: u32) -> Self {
        self.history_window = history_window.max(1);
        self
    }
}

fn tail(messages: &[ChatMessage], limit: u32) -> Vec<ChatMessage> {
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    messages[messages.len().saturating_sub(limit)..].to_vec()
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn load(&self, id: &SessionId) -> Result<Option<ConversationState>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(id).map(|state| ConversationState {
            message_history: tail(&state.message_history, self.history_window),
            ..state.clone()
        }))
    }

    async fn create(&self) -> Result<ConversationState, RepositoryError> {
        let state = ConversationState::new(SessionId::generate());
        let mut sessions = self.sessions.write().await;
        sessions.insert(state.session_id, state.clone());
        Ok(state)
    }

    async fn append_message(
        &self,
        id: &SessionId,
        message: ChatMessage,
    ) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let state = sessions.get_mut(id).ok_or(RepositoryError::SessionNotFound(*id))?;
        state.updated_at = message.created_at;
        state.message_history.push(message);
        Ok(())
    }

    async fn save_pending(
        &self,
        id: &SessionId,
        record: &PartialRecord,
        awaiting_fields: &[String],
    ) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let state = sessions.get_mut(id).ok_or(RepositoryError::SessionNotFound(*id))?;
        state.pending_record = Some(record.clone());
        state.awaiting_fields = awaiting_fields.to_vec();
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn clear(&self, id: &SessionId) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
        Ok(())
    }

    async fn recent_messages(
        &self,
        id: &SessionId,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(id).map(|state| tail(&state.message_history, limit)).unwrap_or_default())
    }

    async fn record_turn(&self, id: &SessionId, write: TurnWrite) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        if write.create_session {
            sessions.entry(*id).or_insert_with(|| ConversationState::new(*id));
        }
        if matches!(write.pending, PendingUpdate::Clear) {
            return sessions
                .remove(id)
                .map(|_| ())
                .ok_or(RepositoryError::SessionNotFound(*id));
        }

        let state = sessions.get_mut(id).ok_or(RepositoryError::SessionNotFound(*id))?;
        state.message_history.extend(write.messages);
        if let PendingUpdate::Save { record, awaiting_fields } = write.pending {
            state.pending_record = Some(record);
            state.awaiting_fields = awaiting_fields;
        }
        state.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use finchat_core::domain::conversation::{ChatMessage, SessionId};
    use finchat_core::domain::record::{PartialRecord, RecordType};

    use crate::repositories::{
        ConversationRepository, InMemoryConversationRepository, PendingUpdate, RepositoryError,
        TurnWrite,
    };

    #[tokio::test]
    async fn in_memory_history_is_windowed_oldest_first() {
        let repo = InMemoryConversationRepository::default().with_history_window(2);
        let session = repo.create().await.expect("create");

        for content in ["a", "b", "c"] {
            repo.append_message(&session.session_id, ChatMessage::user(content))
                .await
                .expect("append");
        }

        let loaded = repo.load(&session.session_id).await.expect("load").expect("exists");
        let contents: Vec<&str> =
            loaded.message_history.iter().map(|message| message.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn in_memory_keep_leaves_pending_untouched() {
        let repo = InMemoryConversationRepository::default();
        let session = repo.create().await.expect("create");
        let draft = PartialRecord::new(RecordType::BudgetLimit);
        repo.save_pending(&session.session_id, &draft, &["category".to_string()])
            .await
            .expect("save");

        repo.record_turn(
            &session.session_id,
            TurnWrite {
                create_session: false,
                messages: vec![ChatMessage::user("e o tempo?")],
                pending: PendingUpdate::Keep,
            },
        )
        .await
        .expect("record");

        let loaded = repo.load(&session.session_id).await.expect("load").expect("exists");
        assert_eq!(loaded.pending_record, Some(draft));
        assert_eq!(loaded.message_history.len(), 1);
    }

    #[tokio::test]
    async fn in_memory_rejects_unknown_session() {
        let repo = InMemoryConversationRepository::default();
        let result = repo
            .record_turn(
                &SessionId::generate(),
                TurnWrite {
                    create_session: false,
                    messages: Vec::new(),
                    pending: PendingUpdate::Clear,
                },
            )
            .await;
        assert!(matches!(result, Err(RepositoryError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn in_memory_first_turn_creates_the_session() {
        let repo = InMemoryConversationRepository::default();
        let fresh = SessionId::generate();

        repo.record_turn(
            &fresh,
            TurnWrite {
                create_session: true,
                messages: vec![ChatMessage::user("oi"), ChatMessage::assistant("Olá!")],
                pending: PendingUpdate::Keep,
            },
        )
        .await
        .expect("first turn");

        let loaded = repo.load(&fresh).await.expect("load").expect("created by the turn");
        assert_eq!(loaded.message_history.len(), 2);
    }
}

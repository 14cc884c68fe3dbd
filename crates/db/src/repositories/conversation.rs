use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use finchat_core::domain::conversation::{ChatMessage, ConversationState, Role, SessionId};
use finchat_core::domain::record::PartialRecord;

use super::{
    ConversationRepository, PendingUpdate, RepositoryError, TurnWrite, DEFAULT_HISTORY_WINDOW,
};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
    history_window: u32,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, history_window: DEFAULT_HISTORY_WINDOW }
    }

    pub fn with_history_window(mut self, history_window: u32) -> Self {
        self.history_window = history_window.max(1);
        self
    }
}

fn decode_error(error: impl ToString) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)).map_err(decode_error)
}

fn row_to_message(row: &SqliteRow) -> Result<ChatMessage, RepositoryError> {
    let role: String = row.try_get("role").map_err(decode_error)?;
    let content: String = row.try_get("content").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;

    Ok(ChatMessage {
        role: Role::parse(&role).ok_or_else(|| decode_error(format!("unknown role `{role}`")))?,
        content,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn row_to_state(
    row: &SqliteRow,
    message_history: Vec<ChatMessage>,
) -> Result<ConversationState, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let pending_record: Option<String> = row.try_get("pending_record").map_err(decode_error)?;
    let awaiting_fields: String = row.try_get("awaiting_fields").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    let pending_record = pending_record
        .map(|raw| serde_json::from_str::<PartialRecord>(&raw))
        .transpose()
        .map_err(decode_error)?;

    Ok(ConversationState {
        session_id: id.parse().map_err(decode_error)?,
        message_history,
        pending_record,
        awaiting_fields: serde_json::from_str(&awaiting_fields).map_err(decode_error)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

async fn insert_session(
    conn: &mut SqliteConnection,
    state: &ConversationState,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO chat_session (id, pending_record_type, pending_record, awaiting_fields,
                                   created_at, updated_at)
         VALUES (?, NULL, NULL, '[]', ?, ?)",
    )
    .bind(state.session_id.to_string())
    .bind(state.created_at.to_rfc3339())
    .bind(state.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    tracing::debug!(
        event_name = "conversation.session_created",
        session_id = %state.session_id,
        "created chat session"
    );
    Ok(())
}

async fn touch_session(
    conn: &mut SqliteConnection,
    id: &SessionId,
    now: &str,
) -> Result<(), RepositoryError> {
    let result = sqlx::query("UPDATE chat_session SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::SessionNotFound(*id));
    }
    Ok(())
}

async fn insert_message(
    conn: &mut SqliteConnection,
    id: &SessionId,
    message: &ChatMessage,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO chat_message (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(message.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn update_pending(
    conn: &mut SqliteConnection,
    id: &SessionId,
    record: &PartialRecord,
    awaiting_fields: &[String],
) -> Result<(), RepositoryError> {
    let record_json = serde_json::to_string(record).map_err(decode_error)?;
    let awaiting_json = serde_json::to_string(awaiting_fields).map_err(decode_error)?;

    sqlx::query(
        "UPDATE chat_session
         SET pending_record_type = ?, pending_record = ?, awaiting_fields = ?
         WHERE id = ?",
    )
    .bind(record.record_type.as_str())
    .bind(record_json)
    .bind(awaiting_json)
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn delete_session(conn: &mut SqliteConnection, id: &SessionId) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM chat_session WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn load(&self, id: &SessionId) -> Result<Option<ConversationState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, pending_record_type, pending_record, awaiting_fields, created_at, updated_at
             FROM chat_session WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => {
                let history = self.recent_messages(id, self.history_window).await?;
                Ok(Some(row_to_state(r, history)?))
            }
            None => Ok(None),
        }
    }

    async fn create(&self) -> Result<ConversationState, RepositoryError> {
        let state = ConversationState::new(SessionId::generate());
        let mut conn = self.pool.acquire().await?;
        insert_session(&mut conn, &state).await?;
        Ok(state)
    }

    async fn append_message(
        &self,
        id: &SessionId,
        message: ChatMessage,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        touch_session(&mut tx, id, &message.created_at.to_rfc3339()).await?;
        insert_message(&mut tx, id, &message).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_pending(
        &self,
        id: &SessionId,
        record: &PartialRecord,
        awaiting_fields: &[String],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        touch_session(&mut tx, id, &Utc::now().to_rfc3339()).await?;
        update_pending(&mut tx, id, record, awaiting_fields).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self, id: &SessionId) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        delete_session(&mut conn, id).await
    }

    async fn recent_messages(
        &self,
        id: &SessionId,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(
            "SELECT role, content, created_at
             FROM chat_message
             WHERE session_id = ?
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows.iter().map(row_to_message).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn record_turn(&self, id: &SessionId, write: TurnWrite) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        if write.create_session {
            insert_session(&mut tx, &ConversationState::new(*id)).await?;
        } else {
            touch_session(&mut tx, id, &Utc::now().to_rfc3339()).await?;
        }

        for message in &write.messages {
            insert_message(&mut tx, id, message).await?;
        }

        match &write.pending {
            PendingUpdate::Keep => {}
            PendingUpdate::Save { record, awaiting_fields } => {
                update_pending(&mut tx, id, record, awaiting_fields).await?;
            }
            PendingUpdate::Clear => delete_session(&mut tx, id).await?,
        }

        tx.commit().await?;
        Ok(())
    }
}

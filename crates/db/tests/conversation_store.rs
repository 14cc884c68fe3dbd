use finchat_core::domain::conversation::{ChatMessage, Role};
use finchat_core::domain::record::{FieldValue, PartialRecord, RecordType};
use finchat_db::{
    connect_with_settings, migrations, ConversationRepository, PendingUpdate,
    SqlConversationRepository, TurnWrite,
};
use tempfile::TempDir;

type StoreTestResult<T = ()> = Result<T, String>;

async fn open(url: &str, max_connections: u32) -> StoreTestResult<SqlConversationRepository> {
    let pool =
        connect_with_settings(url, max_connections, 5).await.map_err(|err| err.to_string())?;
    migrations::run_pending(&pool).await.map_err(|err| err.to_string())?;
    Ok(SqlConversationRepository::new(pool).with_history_window(20))
}

#[tokio::test]
async fn separate_pools_observe_the_same_history() -> StoreTestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let url = format!("sqlite://{}", dir.path().join("finchat.db").display());

    let writer = open(&url, 2).await?;
    let session = writer.create().await.map_err(|err| err.to_string())?;
    writer
        .append_message(&session.session_id, ChatMessage::user("gastei 50 reais"))
        .await
        .map_err(|err| err.to_string())?;

    let reader = open(&url, 2).await?;
    let loaded = reader
        .load(&session.session_id)
        .await
        .map_err(|err| err.to_string())?
        .ok_or_else(|| "session should be visible to a second pool".to_string())?;

    if loaded.message_history.len() != 1 || loaded.message_history[0].role != Role::User {
        return Err(format!("unexpected history: {:?}", loaded.message_history));
    }
    Ok(())
}

#[tokio::test]
async fn oracle_visible_history_matches_append_order() -> StoreTestResult {
    let repo = open("sqlite::memory:", 1).await?;
    let session = repo.create().await.map_err(|err| err.to_string())?;

    let expected: Vec<String> = (0..8).map(|index| format!("turn-{index}")).collect();
    for pair in expected.chunks(2) {
        repo.record_turn(
            &session.session_id,
            TurnWrite {
                create_session: false,
                messages: vec![ChatMessage::user(&pair[0]), ChatMessage::assistant(&pair[1])],
                pending: PendingUpdate::Save {
                    record: PartialRecord::new(RecordType::BudgetLimit)
                        .with_field("category", FieldValue::Text("lazer".to_string())),
                    awaiting_fields: vec!["amount".to_string()],
                },
            },
        )
        .await
        .map_err(|err| err.to_string())?;
    }

    let history =
        repo.recent_messages(&session.session_id, 20).await.map_err(|err| err.to_string())?;
    let contents: Vec<String> = history.into_iter().map(|message| message.content).collect();
    if contents != expected {
        return Err(format!("history out of order: {contents:?}"));
    }
    Ok(())
}

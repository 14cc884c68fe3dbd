use std::sync::Arc;

use finchat_agent::{
    build_llm_client, HttpFinanceClient, LlmExtractionOracle, ProviderError, TurnDependencies,
    TurnOrchestrator,
};
use finchat_core::config::{AppConfig, ConfigError, LoadOptions};
use finchat_db::{connect_with_settings, migrations, DbPool, SqlConversationRepository};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<TurnOrchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client setup failed: {0}")]
    LlmClient(#[source] ProviderError),
    #[error("finance client setup failed: {0}")]
    FinanceClient(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm = build_llm_client(&config.llm).map_err(BootstrapError::LlmClient)?;
    let finance = HttpFinanceClient::from_config(&config.finance)
        .map_err(BootstrapError::FinanceClient)?;
    let finance = Arc::new(finance);
    let store = SqlConversationRepository::new(db_pool.clone())
        .with_history_window(config.conversation.history_window);

    let orchestrator = TurnOrchestrator::new(
        TurnDependencies {
            store: Arc::new(store),
            oracle: Arc::new(LlmExtractionOracle::new(llm, config.llm.temperature)),
            vocabularies: finance.clone(),
            finance,
        },
        &config.conversation,
    );
    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        finance_base_url = %config.finance.base_url,
        "turn orchestrator ready"
    );

    Ok(Application { config, db_pool, orchestrator: Arc::new(orchestrator) })
}

#[cfg(test)]
mod tests {
    use finchat_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_without_llm_api_key() {
        let result = bootstrap(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("missing key should fail").to_string();
        assert!(message.contains("llm.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_the_conversation_store() {
        let app = bootstrap(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                llm_api_key: Some("test-key".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('chat_session', 'chat_message')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("conversation tables should exist after bootstrap");
        assert_eq!(table_count, 2);

        app.db_pool.close().await;
    }
}

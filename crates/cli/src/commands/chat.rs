use std::io::{self, BufRead, Write};
use std::sync::Arc;

use finchat_agent::{
    build_llm_client, HttpFinanceClient, LlmExtractionOracle, TurnDependencies, TurnError,
    TurnOrchestrator, TurnOutcome,
};
use finchat_core::config::AppConfig;
use finchat_core::errors::ApplicationError;
use finchat_db::{connect_with_settings, migrations, SqlConversationRepository};

use crate::commands::{
    current_thread_runtime, load_config, CommandResult, EXIT_CHAT_SETUP, EXIT_DB_CONNECTIVITY,
    EXIT_MIGRATION,
};

const EXIT_WORDS: &[&str] = &["sair", "exit", "quit"];

pub fn run(session: Option<String>) -> CommandResult {
    let config = match load_config("chat") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    init_logging(&config);
    let runtime = match current_thread_runtime("chat") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let orchestrator = match build_orchestrator(&config).await {
            Ok(orchestrator) => orchestrator,
            Err((error_class, message, exit_code)) => {
                return CommandResult::failure("chat", error_class, message, exit_code);
            }
        };

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        match converse(&orchestrator, session, stdin.lock(), &mut stdout).await {
            Ok(_) => CommandResult { exit_code: 0, output: String::new() },
            Err(error) => CommandResult::failure("chat", "terminal_io", error.to_string(), 1),
        }
    })
}

/// Logs go to stderr so they never interleave with the conversation.
fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let level = config.logging.level.parse::<Level>().unwrap_or(Level::WARN);
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(io::stderr)
        .compact()
        .try_init();
}

async fn build_orchestrator(
    config: &AppConfig,
) -> Result<TurnOrchestrator, (&'static str, String, u8)> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DB_CONNECTIVITY))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;

    let llm = build_llm_client(&config.llm)
        .map_err(|error| ("llm_client", error.to_string(), EXIT_CHAT_SETUP))?;
    let finance = HttpFinanceClient::from_config(&config.finance)
        .map_err(|error| ("finance_client", error.to_string(), EXIT_CHAT_SETUP))?;
    let finance = Arc::new(finance);
    let store =
        SqlConversationRepository::new(pool).with_history_window(config.conversation.history_window);

    Ok(TurnOrchestrator::new(
        TurnDependencies {
            store: Arc::new(store),
            oracle: Arc::new(LlmExtractionOracle::new(llm, config.llm.temperature)),
            vocabularies: finance.clone(),
            finance,
        },
        &config.conversation,
    ))
}

/// Reads one message per line until end of input or an exit word, and
/// returns the session the conversation ended in.
pub async fn converse<R: BufRead, W: Write>(
    orchestrator: &TurnOrchestrator,
    mut session: Option<String>,
    input: R,
    output: &mut W,
) -> io::Result<Option<String>> {
    writeln!(output, "Finchat pronto. Digite 'sair' para encerrar.")?;
    if let Some(id) = &session {
        writeln!(output, "Retomando a sessão {id}.")?;
    }

    let mut lines = input.lines();
    loop {
        write!(output, "> ")?;
        output.flush()?;

        let Some(line) = lines.next().transpose()? else {
            writeln!(output)?;
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&message.to_lowercase().as_str()) {
            break;
        }

        match orchestrator.handle_turn(message, session.as_deref()).await {
            Ok(reply) => {
                // A committed record retires its session.
                session = match reply.outcome {
                    TurnOutcome::Committed { .. } => None,
                    _ => Some(reply.session_id.to_string()),
                };
                writeln!(output, "{}", reply.response)?;
            }
            Err(TurnError::SessionNotFound(id)) => {
                writeln!(output, "Sessão {id} não encontrada. A próxima mensagem inicia outra.")?;
                session = None;
            }
            Err(error) => {
                let interface = ApplicationError::from(error).into_interface("cli");
                writeln!(output, "Erro: {}", interface.user_message())?;
            }
        }
    }

    if let Some(id) = &session {
        writeln!(output, "Sessão: {id}")?;
    }
    Ok(session)
}

use std::env;
use std::fs;
use std::path::Path;

use finchat_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key_path: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key_path: &'static str, env_key: &'static str, value: impl Into<String>) -> Self {
        Self { key_path, env_key, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key_path, field.value));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        Field::new("database.url", "FINCHAT_DATABASE_URL", redact_url(&config.database.url)),
        Field::new(
            "database.max_connections",
            "FINCHAT_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        Field::new(
            "database.timeout_secs",
            "FINCHAT_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        Field::new("llm.provider", "FINCHAT_LLM_PROVIDER", config.llm.provider.as_str()),
        Field::new("llm.model", "FINCHAT_LLM_MODEL", config.llm.model.as_str()),
        Field::new(
            "llm.base_url",
            "FINCHAT_LLM_BASE_URL",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new("llm.api_key", "FINCHAT_LLM_API_KEY", llm_api_key),
        Field::new(
            "llm.temperature",
            "FINCHAT_LLM_TEMPERATURE",
            config.llm.temperature.to_string(),
        ),
        Field::new(
            "finance.base_url",
            "FINCHAT_FINANCE_BASE_URL",
            redact_url(&config.finance.base_url),
        ),
        Field::new(
            "finance.read_retries",
            "FINCHAT_FINANCE_READ_RETRIES",
            config.finance.read_retries.to_string(),
        ),
        Field::new(
            "conversation.history_window",
            "FINCHAT_CONVERSATION_HISTORY_WINDOW",
            config.conversation.history_window.to_string(),
        ),
        Field::new(
            "conversation.max_message_chars",
            "FINCHAT_CONVERSATION_MAX_MESSAGE_CHARS",
            config.conversation.max_message_chars.to_string(),
        ),
        Field::new(
            "server.bind_address",
            "FINCHAT_SERVER_BIND_ADDRESS",
            config.server.bind_address.as_str(),
        ),
        Field::new("server.port", "FINCHAT_SERVER_PORT", config.server.port.to_string()),
        Field::new("logging.level", "FINCHAT_LOGGING_LEVEL", config.logging.level.as_str()),
        Field::new(
            "logging.format",
            "FINCHAT_LOGGING_FORMAT",
            format!("{:?}", config.logging.format).to_lowercase(),
        ),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Hides `user:password@` credentials embedded in a connection URL.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://<redacted>@{}", &rest[at + 1..]),
        None => url.to_string(),
    }
}

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use finchat_core::domain::conversation::ChatMessage;
use finchat_core::domain::record::{PartialRecord, RecordType};
use finchat_core::domain::vocabulary::{Vocabularies, Vocabulary, VocabularyKind};
use finchat_core::slots::schema::all_schemas;
use finchat_core::slots::{schema_for, FieldKind};

use crate::llm::{LlmClient, LlmRequest, ProviderError, ProviderErrorKind};

/// Fixed reply for conversations that are not about personal finance.
pub const OFF_TOPIC_REPLY: &str =
    "Desculpe, estou autorizado a ajudar apenas com finanças pessoais no momento.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtractionResult {
    Classified {
        record_type: RecordType,
        /// Only the fields the oracle populated on this call.
        partial_record: PartialRecord,
        is_complete: bool,
        response_message: String,
    },
    OffTopic {
        response_message: String,
    },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle output could not be parsed: {0}")]
    MalformedOutput(String),
    #[error(transparent)]
    Provider(ProviderError),
    #[error("unexpected oracle failure: {0}")]
    Unknown(String),
}

impl From<ProviderError> for OracleError {
    fn from(error: ProviderError) -> Self {
        match error.kind {
            ProviderErrorKind::InvalidResponse => Self::MalformedOutput(error.message),
            _ => Self::Provider(error),
        }
    }
}

#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    /// Classifies the conversation and extracts whatever fields it can find.
    /// `history` is oldest first and already ends with the current message.
    async fn extract(
        &self,
        history: &[ChatMessage],
        record_type_hint: Option<RecordType>,
        vocabularies: &Vocabularies,
    ) -> Result<ExtractionResult, OracleError>;
}

/// Oracle backed by a chat model that answers with a JSON object
/// `{intent, fields, is_complete, response_message}`.
pub struct LlmExtractionOracle {
    client: Arc<dyn LlmClient>,
    temperature: f32,
}

impl LlmExtractionOracle {
    pub fn new(client: Arc<dyn LlmClient>, temperature: f32) -> Self {
        Self { client, temperature }
    }
}

#[async_trait]
impl ExtractionOracle for LlmExtractionOracle {
    async fn extract(
        &self,
        history: &[ChatMessage],
        record_type_hint: Option<RecordType>,
        vocabularies: &Vocabularies,
    ) -> Result<ExtractionResult, OracleError> {
        if history.is_empty() {
            return Err(OracleError::Unknown("extraction requested with empty history".into()));
        }

        let request = LlmRequest {
            system: build_system_prompt(vocabularies, record_type_hint),
            messages: history.to_vec(),
            temperature: self.temperature,
        };
        let raw = self.client.complete(&request).await?;
        let result = parse_output(&raw)?;

        tracing::debug!(
            event_name = "oracle.extracted",
            provider = self.client.name(),
            off_topic = matches!(result, ExtractionResult::OffTopic { .. }),
            "oracle answered"
        );
        Ok(result)
    }
}

pub fn build_system_prompt(vocabularies: &Vocabularies, hint: Option<RecordType>) -> String {
    let mut prompt = String::from(
        "Você é um assistente de finanças pessoais. Seu objetivo é ajudar a registrar gastos \
         e cadastrar limites de gastos por categoria.\n\n",
    );

    for kind in VocabularyKind::ALL {
        let _ = writeln!(
            prompt,
            "Valores válidos para `{}` (use sempre a chave): [{}]",
            kind.as_str(),
            vocabulary_listing(vocabularies.get(kind))
        );
    }

    for schema in all_schemas() {
        let _ = writeln!(
            prompt,
            "\nIntent `{}` ({}): campos obrigatórios, nesta ordem:",
            schema.record_type.as_str(),
            schema.label
        );
        for field in schema.fields {
            let kind = match field.kind {
                FieldKind::Vocabulary(kind) => {
                    format!("um dos valores válidos de `{}`", kind.as_str())
                }
                FieldKind::FreeText => "texto livre".to_string(),
                FieldKind::PositiveDecimal => "número decimal positivo".to_string(),
            };
            let _ = writeln!(prompt, "- `{}`: {} ({kind})", field.name, field.prompt);
        }
    }

    let _ = write!(
        prompt,
        "\nSe algum campo estiver faltando, `response_message` deve perguntar educadamente \
         apenas pelos dados que faltam. Se todos estiverem presentes, `response_message` deve \
         confirmar o registro com os dados extraídos e `is_complete` deve ser true.\n\
         Se o usuário falar de assuntos que não sejam finanças pessoais, use o intent \
         `off_topic`, `fields` vazio e `response_message` igual a \"{OFF_TOPIC_REPLY}\".\n\
         Use o histórico da conversa para entender correções ou adições de informações \
         anteriores.\n"
    );

    if let Some(record_type) = hint {
        let _ = writeln!(
            prompt,
            "Há um registro `{}` em andamento; continue com ele a menos que o usuário mude de \
             assunto claramente.",
            record_type.as_str()
        );
    }

    prompt.push_str(
        "\nResponda somente com um objeto JSON no formato \
         {\"intent\": \"spending\" | \"budget_limit\" | \"off_topic\", \
         \"fields\": {<campo>: <valor ou null>}, \"is_complete\": bool, \
         \"response_message\": string}.",
    );
    prompt
}

fn vocabulary_listing(vocabulary: &Vocabulary) -> String {
    vocabulary
        .entries()
        .iter()
        .map(|entry| format!("{} ({})", entry.key, entry.display_name))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Deserialize)]
struct OracleOutput {
    intent: String,
    #[serde(default)]
    fields: Option<Map<String, Value>>,
    #[serde(default)]
    is_complete: bool,
    #[serde(default)]
    response_message: String,
}

/// Parses the model answer. Tolerates a markdown code fence around the JSON.
pub fn parse_output(raw: &str) -> Result<ExtractionResult, OracleError> {
    let output: OracleOutput = serde_json::from_str(strip_code_fence(raw))
        .map_err(|error| OracleError::MalformedOutput(format!("{error}: {}", preview(raw))))?;

    let intent = output.intent.trim().to_ascii_lowercase().replace(['-', ' '], "_");
    if matches!(intent.as_str(), "off_topic" | "offtopic" | "other" | "outros") {
        return Ok(ExtractionResult::OffTopic { response_message: OFF_TOPIC_REPLY.to_string() });
    }

    let record_type = RecordType::parse(&intent)
        .ok_or_else(|| OracleError::MalformedOutput(format!("unknown intent `{}`", output.intent)))?;
    let response_message = output.response_message.trim().to_string();
    if response_message.is_empty() {
        return Err(OracleError::MalformedOutput("missing response_message".into()));
    }

    let schema = schema_for(record_type);
    let mut partial_record = PartialRecord::new(record_type);
    for (name, raw_value) in output.fields.unwrap_or_default() {
        let Some(field) = schema.field(&name) else {
            continue;
        };
        if let Some(value) = field.coerce(&raw_value) {
            partial_record.set(field.name, value);
        }
    }

    Ok(ExtractionResult::Classified {
        record_type,
        partial_record,
        is_complete: output.is_complete,
        response_message,
    })
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn preview(raw: &str) -> String {
    raw.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use finchat_core::domain::conversation::ChatMessage;
    use finchat_core::domain::record::{FieldValue, RecordType};
    use finchat_core::domain::vocabulary::Vocabularies;

    use super::{
        build_system_prompt, parse_output, ExtractionOracle, ExtractionResult,
        LlmExtractionOracle, OracleError, OFF_TOPIC_REPLY,
    };
    use crate::llm::{LlmClient, LlmRequest, ProviderError};

    struct CannedClient {
        answer: Result<String, ProviderError>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    #[async_trait]
    impl LlmClient for CannedClient {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn complete(&self, request: &LlmRequest) -> Result<String, ProviderError> {
            self.seen.lock().expect("lock").push(request.clone());
            self.answer.clone()
        }
    }

    #[test]
    fn prompt_lists_vocabularies_schema_and_refusal() {
        let prompt = build_system_prompt(&Vocabularies::fallback(), Some(RecordType::Spending));

        assert!(prompt.contains("mercado (Mercado)"));
        assert!(prompt.contains("joao_lucas"));
        assert!(prompt.contains("`purchase_location`"));
        assert!(prompt.contains(OFF_TOPIC_REPLY));
        assert!(prompt.contains("registro `spending` em andamento"));
    }

    #[test]
    fn classified_output_keeps_only_populated_schema_fields() {
        let raw = r#"```json
        {"intent": "spending",
         "fields": {"amount": "50", "category": null, "payment_method": " Itau ", "mood": "ok"},
         "is_complete": false,
         "response_message": "Qual a categoria?"}
        ```"#;

        let ExtractionResult::Classified { record_type, partial_record, is_complete, .. } =
            parse_output(raw).expect("parsed")
        else {
            panic!("expected a classified result");
        };

        assert_eq!(record_type, RecordType::Spending);
        assert!(!is_complete);
        assert_eq!(partial_record.get("amount"), Some(&FieldValue::Amount(Decimal::from(50))));
        assert_eq!(partial_record.text("payment_method"), Some("itau"));
        assert_eq!(partial_record.get("category"), None);
        assert_eq!(partial_record.get("mood"), None);
    }

    #[test]
    fn off_topic_always_uses_the_fixed_reply() {
        let raw = r#"{"intent": "off_topic", "fields": null, "is_complete": false,
                      "response_message": "Hoje vai chover."}"#;
        assert_eq!(
            parse_output(raw).expect("parsed"),
            ExtractionResult::OffTopic { response_message: OFF_TOPIC_REPLY.to_string() }
        );
    }

    #[test]
    fn unparseable_or_unknown_intent_is_malformed() {
        assert!(matches!(parse_output("não sei"), Err(OracleError::MalformedOutput(_))));
        assert!(matches!(
            parse_output(r#"{"intent": "investment", "response_message": "ok"}"#),
            Err(OracleError::MalformedOutput(_))
        ));
    }

    #[tokio::test]
    async fn provider_failures_stay_distinguished() {
        let oracle = LlmExtractionOracle::new(
            Arc::new(CannedClient {
                answer: Err(ProviderError::from_status(503, "overloaded")),
                seen: Mutex::new(Vec::new()),
            }),
            0.0,
        );

        let result = oracle
            .extract(&[ChatMessage::user("gastei 50")], None, &Vocabularies::fallback())
            .await;
        assert!(matches!(result, Err(OracleError::Provider(_))));

        let empty = oracle.extract(&[], None, &Vocabularies::fallback()).await;
        assert!(matches!(empty, Err(OracleError::Unknown(_))));
    }

    #[tokio::test]
    async fn history_is_forwarded_in_order() {
        let client = Arc::new(CannedClient {
            answer: Ok(r#"{"intent":"budget_limit","fields":{"category":"lazer"},
                           "is_complete":false,"response_message":"Qual o valor?"}"#
                .to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let oracle = LlmExtractionOracle::new(client.clone(), 0.0);
        let history = vec![
            ChatMessage::user("quero um limite"),
            ChatMessage::assistant("Para qual categoria?"),
            ChatMessage::user("lazer"),
        ];

        oracle.extract(&history, None, &Vocabularies::fallback()).await.expect("extracted");

        let seen = client.seen.lock().expect("lock");
        let contents: Vec<&str> =
            seen[0].messages.iter().map(|message| message.content.as_str()).collect();
        assert_eq!(contents, vec!["quero um limite", "Para qual categoria?", "lazer"]);
    }
}

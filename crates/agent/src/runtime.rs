use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use finchat_core::config::ConversationConfig;
use finchat_core::domain::conversation::{ChatMessage, ConversationState, SessionId};
use finchat_core::domain::record::{CompletedRecord, PartialRecord, RecordType};
use finchat_core::errors::{ApplicationError, DomainError};
use finchat_core::flows::{
    FlowAction, FlowContext, FlowEngine, FlowTransitionError, SlotFillingFlow, TurnEvent,
    TurnStage,
};
use finchat_core::slots::{canonicalize, evaluate, merge, schema_for, Evaluation};
use finchat_db::{ConversationRepository, PendingUpdate, RepositoryError, TurnWrite};

use crate::commit::{CommitFailure, FinanceStore};
use crate::guardrails::{GuardrailDecision, MessagePolicy};
use crate::oracle::{ExtractionOracle, ExtractionResult, OracleError};
use crate::session_lock::SessionLocks;
use crate::vocabulary::{load_vocabularies, VocabularySource};

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("session `{0}` not found")]
    SessionNotFound(String),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Persistence(RepositoryError),
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
    #[error(transparent)]
    Invariant(DomainError),
}

impl From<RepositoryError> for TurnError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::SessionNotFound(id) => Self::SessionNotFound(id.to_string()),
            other => Self::Persistence(other),
        }
    }
}

impl From<TurnError> for ApplicationError {
    fn from(error: TurnError) -> Self {
        match error {
            TurnError::InvalidRequest(detail) => {
                ApplicationError::Domain(DomainError::InvalidMessage(detail))
            }
            TurnError::SessionNotFound(id) => ApplicationError::NotFound(format!("session {id}")),
            TurnError::Oracle(OracleError::Provider(provider)) => {
                ApplicationError::Integration(provider.to_string())
            }
            TurnError::Oracle(other) => ApplicationError::Internal(other.to_string()),
            TurnError::Persistence(repository) => {
                ApplicationError::Persistence(repository.to_string())
            }
            TurnError::Flow(flow) => ApplicationError::Internal(flow.to_string()),
            TurnError::Invariant(domain) => ApplicationError::Internal(domain.to_string()),
        }
    }
}

/// How a successful turn ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnOutcome {
    OffTopic,
    FollowUp { record_type: RecordType, missing_fields: Vec<String> },
    Committed { record_type: RecordType },
    CommitDeferred { record_type: RecordType, failure: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReply {
    pub response: String,
    pub session_id: SessionId,
    /// Bounded history including this turn's messages, oldest first.
    pub history: Vec<ChatMessage>,
    pub is_complete: bool,
    pub outcome: TurnOutcome,
}

pub struct TurnDependencies {
    pub store: Arc<dyn ConversationRepository>,
    pub oracle: Arc<dyn ExtractionOracle>,
    pub vocabularies: Arc<dyn VocabularySource>,
    pub finance: Arc<dyn FinanceStore>,
}

/// Writes and reply text collected while the turn runs. Nothing reaches the
/// store until the turn is done.
#[derive(Default)]
struct StagedTurn {
    messages: Vec<ChatMessage>,
    reply: String,
    annotation: Option<String>,
    pending: Option<(PartialRecord, Vec<String>)>,
    clear: bool,
    create_session: bool,
}

impl StagedTurn {
    fn perform(&mut self, actions: &[FlowAction], commit_failure: Option<&CommitFailure>) {
        for action in actions {
            match action {
                FlowAction::StageAssistantReply => {
                    let content = match &self.annotation {
                        Some(annotation) => format!("{}\n\n{annotation}", self.reply),
                        None => self.reply.clone(),
                    };
                    self.reply = content.clone();
                    self.messages.push(ChatMessage::assistant(content));
                }
                FlowAction::AnnotateDegradedService => {
                    self.annotation = commit_failure.map(CommitFailure::annotation);
                }
                FlowAction::ClearSession => self.clear = true,
                // Pending data is set by the caller before SavePending runs.
                FlowAction::SavePending
                | FlowAction::LoadSession
                | FlowAction::CreateSession
                | FlowAction::StageUserMessage
                | FlowAction::CallOracle
                | FlowAction::MergeAndEvaluate
                | FlowAction::CommitRecord => {}
            }
        }
    }

    fn into_write(self) -> TurnWrite {
        let pending = if self.clear {
            PendingUpdate::Clear
        } else {
            match self.pending {
                Some((record, awaiting_fields)) => PendingUpdate::Save { record, awaiting_fields },
                None => PendingUpdate::Keep,
            }
        };
        TurnWrite { create_session: self.create_session, messages: self.messages, pending }
    }
}

pub struct TurnOrchestrator {
    deps: TurnDependencies,
    policy: MessagePolicy,
    history_window: usize,
    locks: SessionLocks,
    engine: FlowEngine<SlotFillingFlow>,
}

impl TurnOrchestrator {
    pub fn new(deps: TurnDependencies, config: &ConversationConfig) -> Self {
        Self {
            deps,
            policy: MessagePolicy { max_message_chars: config.max_message_chars },
            history_window: usize::try_from(config.history_window).unwrap_or(usize::MAX).max(1),
            locks: SessionLocks::default(),
            engine: FlowEngine::default(),
        }
    }

    /// Runs one turn. `session_id = None` starts a new conversation, stored
    /// only once the turn succeeds. An unknown or unparseable id is
    /// `SessionNotFound`, never a silent restart.
    pub async fn handle_turn(
        &self,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<TurnReply, TurnError> {
        if let GuardrailDecision::Deny { reason_code, user_message } = self.policy.evaluate(message)
        {
            tracing::info!(event_name = "turn.rejected", reason_code, "message denied");
            return Err(TurnError::InvalidRequest(user_message));
        }

        let mut stage = self.engine.initial_state();
        let idle = FlowContext::default();
        let fresh = session_id.is_none();

        let (state, _guard) = match session_id {
            Some(raw) => {
                let id: SessionId =
                    raw.parse().map_err(|_| TurnError::SessionNotFound(raw.to_string()))?;
                self.advance(&mut stage, TurnEvent::SessionSupplied, &idle)?;
                let guard = self.locks.acquire(id).await;
                let state = self
                    .deps
                    .store
                    .load(&id)
                    .await?
                    .ok_or_else(|| TurnError::SessionNotFound(id.to_string()))?;
                (state, guard)
            }
            None => {
                self.advance(&mut stage, TurnEvent::NoSessionSupplied, &idle)?;
                let state = ConversationState::new(SessionId::generate());
                let guard = self.locks.acquire(state.session_id).await;
                (state, guard)
            }
        };
        let session_id = state.session_id;

        let result = self.run_turn(&mut stage, state, message, fresh).await;
        if let Err(error) = &result {
            if let Err(transition) = self.advance(&mut stage, TurnEvent::TurnAborted, &idle) {
                tracing::debug!(
                    event_name = "turn.abort_transition_rejected",
                    stage = ?stage,
                    error = %transition,
                    "turn stage could not record the abort"
                );
            }
            tracing::warn!(
                event_name = "turn.aborted",
                session_id = %session_id,
                error = %error,
                "turn aborted without touching stored state"
            );
        }
        result
    }

    async fn run_turn(
        &self,
        stage: &mut TurnStage,
        state: ConversationState,
        message: &str,
        fresh: bool,
    ) -> Result<TurnReply, TurnError> {
        let session_id = state.session_id;
        let idle = FlowContext::default();
        let mut staged = StagedTurn { create_session: fresh, ..StagedTurn::default() };

        self.advance(stage, TurnEvent::SessionResolved, &idle)?;
        staged.messages.push(ChatMessage::user(message.trim()));
        self.advance(stage, TurnEvent::UserMessageStaged, &idle)?;

        let mut history = state.message_history.clone();
        history.extend(staged.messages.iter().cloned());
        let history = self.windowed(history);

        let vocabularies = load_vocabularies(self.deps.vocabularies.as_ref()).await;
        let hint = state.pending_record.as_ref().map(|record| record.record_type);
        let extraction = self.deps.oracle.extract(&history, hint, &vocabularies).await?;

        let (is_complete, outcome) = match extraction {
            ExtractionResult::OffTopic { response_message } => {
                let actions = self.advance(stage, TurnEvent::OffTopicDetected, &idle)?;
                staged.reply = response_message;
                staged.perform(&actions, None);
                (false, TurnOutcome::OffTopic)
            }
            ExtractionResult::Classified {
                record_type,
                partial_record,
                is_complete: oracle_complete,
                response_message,
            } => {
                self.advance(stage, TurnEvent::RecordExtracted, &idle)?;

                let switched = state
                    .pending_record
                    .as_ref()
                    .filter(|pending| pending.record_type != record_type);
                if let Some(previous) = switched {
                    tracing::info!(
                        event_name = "turn.record_type_switched",
                        session_id = %session_id,
                        from = previous.record_type.as_str(),
                        to = record_type.as_str(),
                        "discarding pending record of the previous type"
                    );
                }
                let merged = canonicalize(
                    &merge(state.pending_record.as_ref(), &partial_record),
                    &vocabularies,
                );
                let evaluation = evaluate(&merged, &vocabularies);
                if evaluation.is_complete != oracle_complete {
                    tracing::warn!(
                        event_name = "turn.oracle_disagreement",
                        session_id = %session_id,
                        oracle_complete,
                        missing_fields = ?evaluation.missing_fields,
                        "evaluator overrides oracle completion flag"
                    );
                }

                if evaluation.is_complete {
                    staged.reply = if oracle_complete {
                        response_message
                    } else {
                        confirmation_message(&merged)?
                    };
                    self.commit(stage, &mut staged, merged, &evaluation).await?
                } else {
                    staged.reply = if oracle_complete {
                        followup_question(record_type, &evaluation.missing_fields)
                    } else {
                        response_message
                    };
                    let context = FlowContext::awaiting(&evaluation.missing_fields);
                    let actions = self.advance(stage, TurnEvent::FieldsMissing, &context)?;
                    staged.pending = Some((merged, evaluation.missing_fields.clone()));
                    staged.perform(&actions, None);
                    self.advance(stage, TurnEvent::FollowupPrepared, &context)?;
                    (
                        false,
                        TurnOutcome::FollowUp {
                            record_type,
                            missing_fields: evaluation.missing_fields,
                        },
                    )
                }
            }
        };

        let response = staged.reply.clone();
        let mut reply_history = state.message_history;
        reply_history.extend(staged.messages.iter().cloned());
        let reply_history = self.windowed(reply_history);

        self.deps.store.record_turn(&session_id, staged.into_write()).await?;

        tracing::info!(
            event_name = "turn.completed",
            session_id = %session_id,
            stage = ?stage,
            is_complete,
            outcome = ?outcome,
            "turn finished"
        );
        Ok(TurnReply { response, session_id, history: reply_history, is_complete, outcome })
    }

    async fn commit(
        &self,
        stage: &mut TurnStage,
        staged: &mut StagedTurn,
        merged: PartialRecord,
        evaluation: &Evaluation,
    ) -> Result<(bool, TurnOutcome), TurnError> {
        let context = FlowContext::awaiting(&evaluation.missing_fields);
        self.advance(stage, TurnEvent::RecordCompleted, &context)?;

        let completed = CompletedRecord::try_from(&merged).map_err(TurnError::Invariant)?;
        let record_type = completed.record_type();

        match self.deps.finance.commit(&completed).await {
            Ok(receipt) => {
                tracing::info!(
                    event_name = "commit.succeeded",
                    record_type = record_type.as_str(),
                    created = %receipt.created,
                    "record stored in finance service"
                );
                let actions = self.advance(stage, TurnEvent::CommitSucceeded, &context)?;
                staged.perform(&actions, None);
                Ok((true, TurnOutcome::Committed { record_type }))
            }
            Err(failure) => {
                tracing::error!(
                    event_name = "commit.failed",
                    record_type = record_type.as_str(),
                    failure_kind = failure.kind(),
                    error = %failure,
                    "finance service did not store the record; keeping it pending"
                );
                let actions = self.advance(stage, TurnEvent::CommitFailed, &context)?;
                staged.pending = Some((merged, Vec::new()));
                staged.perform(&actions, Some(&failure));
                Ok((
                    false,
                    TurnOutcome::CommitDeferred {
                        record_type,
                        failure: failure.kind().to_string(),
                    },
                ))
            }
        }
    }

    /// Current stored state of a session without running a turn.
    pub async fn inspect(&self, session_id: &str) -> Result<ConversationState, TurnError> {
        let id: SessionId =
            session_id.parse().map_err(|_| TurnError::SessionNotFound(session_id.to_string()))?;
        self.deps
            .store
            .load(&id)
            .await?
            .ok_or_else(|| TurnError::SessionNotFound(id.to_string()))
    }

    fn advance(
        &self,
        stage: &mut TurnStage,
        event: TurnEvent,
        context: &FlowContext,
    ) -> Result<Vec<FlowAction>, TurnError> {
        let outcome = self.engine.apply(stage, &event, context)?;
        tracing::trace!(
            event_name = "turn.transition",
            from = ?outcome.from,
            to = ?outcome.to,
            event = ?outcome.event,
            "turn stage advanced"
        );
        *stage = outcome.to;
        Ok(outcome.actions)
    }

    fn windowed(&self, mut history: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let overflow = history.len().saturating_sub(self.history_window);
        history.drain(..overflow);
        history
    }
}

/// Follow-up built from the schema prompts, used when the oracle claimed a
/// record was complete but the evaluator disagrees.
pub fn followup_question(record_type: RecordType, missing_fields: &[String]) -> String {
    let schema = schema_for(record_type);
    let prompts: Vec<&str> = schema
        .fields
        .iter()
        .filter(|field| missing_fields.iter().any(|missing| missing == field.name))
        .map(|field| field.prompt)
        .collect();

    let listed = match prompts.split_last() {
        None => String::new(),
        Some((last, [])) => (*last).to_string(),
        Some((last, rest)) => format!("{} e {last}", rest.join(", ")),
    };
    format!("Para concluir o {}, preciso saber {listed}.", schema.label)
}

pub fn confirmation_message(record: &PartialRecord) -> Result<String, TurnError> {
    let completed = CompletedRecord::try_from(record).map_err(TurnError::Invariant)?;
    Ok(format!("Confirmado: {}.", completed.summary()))
}

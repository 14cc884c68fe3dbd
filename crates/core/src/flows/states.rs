use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowType {
    SlotFilling,
}

/// Stages of a single chat turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnStage {
    Start,
    ResolveSession,
    RecordUserMessage,
    Extract,
    Evaluate,
    AskFollowup,
    Commit,
    Respond,
    Aborted,
}

impl TurnStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Respond | Self::Aborted)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnEvent {
    SessionSupplied,
    NoSessionSupplied,
    SessionResolved,
    UserMessageStaged,
    RecordExtracted,
    OffTopicDetected,
    FieldsMissing,
    RecordCompleted,
    FollowupPrepared,
    CommitSucceeded,
    CommitFailed,
    TurnAborted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub awaiting_fields: Vec<String>,
}

impl FlowContext {
    pub fn awaiting(fields: &[String]) -> Self {
        Self { awaiting_fields: fields.to_vec() }
    }
}

/// Side effects the orchestrator performs after a transition. Store writes
/// are staged and flushed together when the turn reaches `Respond`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    LoadSession,
    CreateSession,
    StageUserMessage,
    CallOracle,
    MergeAndEvaluate,
    StageAssistantReply,
    AnnotateDegradedService,
    SavePending,
    CommitRecord,
    ClearSession,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TurnStage,
    pub to: TurnStage,
    pub event: TurnEvent,
    pub actions: Vec<FlowAction>,
}

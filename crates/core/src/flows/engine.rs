use thiserror::Error;

use crate::flows::states::{
    FlowAction, FlowContext, FlowType, TransitionOutcome, TurnEvent, TurnStage,
};

pub trait FlowDefinition {
    fn flow_type(&self) -> FlowType;
    fn initial_state(&self) -> TurnStage;
    fn transition(
        &self,
        current: &TurnStage,
        event: &TurnEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct SlotFillingFlow;

impl FlowDefinition for SlotFillingFlow {
    fn flow_type(&self) -> FlowType {
        FlowType::SlotFilling
    }

    fn initial_state(&self) -> TurnStage {
        TurnStage::Start
    }

    fn transition(
        &self,
        current: &TurnStage,
        event: &TurnEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_slot_filling(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn flow_type(&self) -> FlowType {
        self.flow.flow_type()
    }

    pub fn initial_state(&self) -> TurnStage {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &TurnStage,
        event: &TurnEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }
}

impl Default for FlowEngine<SlotFillingFlow> {
    fn default() -> Self {
        Self::new(SlotFillingFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required fields before transition from {state:?}: {missing_fields:?}")]
    MissingRequiredFields { state: TurnStage, missing_fields: Vec<String> },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: TurnStage, event: TurnEvent },
}

fn transition_slot_filling(
    current: &TurnStage,
    event: &TurnEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        AnnotateDegradedService, CallOracle, ClearSession, CommitRecord, CreateSession,
        LoadSession, MergeAndEvaluate, SavePending, StageAssistantReply, StageUserMessage,
    };
    use TurnEvent::{
        CommitFailed, CommitSucceeded, FieldsMissing, FollowupPrepared, NoSessionSupplied,
        OffTopicDetected, RecordCompleted, RecordExtracted, SessionResolved, SessionSupplied,
        TurnAborted, UserMessageStaged,
    };
    use TurnStage::{
        Aborted, AskFollowup, Commit, Evaluate, Extract, RecordUserMessage, ResolveSession,
        Respond, Start,
    };

    let invalid = || FlowTransitionError::InvalidTransition {
        state: current.clone(),
        event: event.clone(),
    };

    let (to, actions) = match (current, event) {
        (Start, SessionSupplied) => (ResolveSession, vec![LoadSession]),
        (Start, NoSessionSupplied) => (ResolveSession, vec![CreateSession]),
        (ResolveSession, SessionResolved) => (RecordUserMessage, vec![StageUserMessage]),
        (RecordUserMessage, UserMessageStaged) => (Extract, vec![CallOracle]),
        (Extract, RecordExtracted) => (Evaluate, vec![MergeAndEvaluate]),
        (Extract, OffTopicDetected) => (Respond, vec![StageAssistantReply]),
        (Evaluate, FieldsMissing) => {
            if context.awaiting_fields.is_empty() {
                return Err(invalid());
            }
            (AskFollowup, vec![StageAssistantReply, SavePending])
        }
        (Evaluate, RecordCompleted) => {
            if !context.awaiting_fields.is_empty() {
                return Err(FlowTransitionError::MissingRequiredFields {
                    state: current.clone(),
                    missing_fields: context.awaiting_fields.clone(),
                });
            }
            (Commit, vec![CommitRecord])
        }
        (AskFollowup, FollowupPrepared) => (Respond, Vec::new()),
        (Commit, CommitSucceeded) => (Respond, vec![StageAssistantReply, ClearSession]),
        (Commit, CommitFailed) => {
            (Respond, vec![AnnotateDegradedService, StageAssistantReply, SavePending])
        }
        (stage, TurnAborted) if !stage.is_terminal() => (Aborted, Vec::new()),
        _ => return Err(invalid()),
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::flows::engine::{FlowDefinition, FlowEngine, FlowTransitionError, SlotFillingFlow};
    use crate::flows::states::{FlowAction, FlowContext, FlowType, TurnEvent, TurnStage};

    fn run(engine: &FlowEngine<SlotFillingFlow>, events: &[(TurnEvent, FlowContext)]) -> TurnStage {
        let mut stage = engine.initial_state();
        for (event, context) in events {
            stage = engine.apply(&stage, event, context).expect("valid transition").to;
        }
        stage
    }

    #[test]
    fn follow_up_turn_reaches_respond() {
        let engine = FlowEngine::default();
        let missing = FlowContext::awaiting(&["amount".to_owned()]);

        let stage = run(
            &engine,
            &[
                (TurnEvent::NoSessionSupplied, FlowContext::default()),
                (TurnEvent::SessionResolved, FlowContext::default()),
                (TurnEvent::UserMessageStaged, FlowContext::default()),
                (TurnEvent::RecordExtracted, FlowContext::default()),
            ],
        );
        assert_eq!(stage, TurnStage::Evaluate);

        let ask = engine.apply(&stage, &TurnEvent::FieldsMissing, &missing).expect("ask");
        assert_eq!(ask.to, TurnStage::AskFollowup);
        assert_eq!(ask.actions, vec![FlowAction::StageAssistantReply, FlowAction::SavePending]);

        let respond = engine
            .apply(&ask.to, &TurnEvent::FollowupPrepared, &FlowContext::default())
            .expect("respond");
        assert_eq!(respond.to, TurnStage::Respond);
    }

    #[test]
    fn commit_failure_keeps_pending_record() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&TurnStage::Commit, &TurnEvent::CommitFailed, &FlowContext::default())
            .expect("commit failed");

        assert_eq!(outcome.to, TurnStage::Respond);
        assert!(outcome.actions.contains(&FlowAction::SavePending));
        assert!(outcome.actions.contains(&FlowAction::AnnotateDegradedService));
        assert!(!outcome.actions.contains(&FlowAction::ClearSession));

        let success = engine
            .apply(&TurnStage::Commit, &TurnEvent::CommitSucceeded, &FlowContext::default())
            .expect("commit succeeded");
        assert!(success.actions.contains(&FlowAction::ClearSession));
    }

    #[test]
    fn off_topic_skips_evaluation_and_pending_writes() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&TurnStage::Extract, &TurnEvent::OffTopicDetected, &FlowContext::default())
            .expect("off topic");

        assert_eq!(outcome.to, TurnStage::Respond);
        assert_eq!(outcome.actions, vec![FlowAction::StageAssistantReply]);
    }

    #[test]
    fn completion_with_missing_fields_is_rejected() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(
                &TurnStage::Evaluate,
                &TurnEvent::RecordCompleted,
                &FlowContext::awaiting(&["purchase_location".to_owned()]),
            )
            .expect_err("must reject missing fields");

        assert!(matches!(error, FlowTransitionError::MissingRequiredFields { .. }));
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&TurnStage::Start, &TurnEvent::RecordExtracted, &FlowContext::default())
            .expect_err("start cannot jump to evaluation");

        assert!(matches!(
            error,
            FlowTransitionError::InvalidTransition {
                state: TurnStage::Start,
                event: TurnEvent::RecordExtracted
            }
        ));

        let empty_followup = engine
            .apply(&TurnStage::Evaluate, &TurnEvent::FieldsMissing, &FlowContext::default())
            .expect_err("follow-up needs missing fields");
        assert!(matches!(empty_followup, FlowTransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn abort_only_leaves_non_terminal_stages() {
        let engine = FlowEngine::default();
        let aborted = engine
            .apply(&TurnStage::Extract, &TurnEvent::TurnAborted, &FlowContext::default())
            .expect("abort during extraction");
        assert_eq!(aborted.to, TurnStage::Aborted);
        assert!(aborted.actions.is_empty());

        assert!(engine
            .apply(&TurnStage::Respond, &TurnEvent::TurnAborted, &FlowContext::default())
            .is_err());
        assert_eq!(engine.flow_type(), FlowType::SlotFilling);
        assert_eq!(SlotFillingFlow.flow_type(), FlowType::SlotFilling);
    }
}

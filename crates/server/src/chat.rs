use std::any::Any;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::catch_panic::CatchPanicLayer;
use uuid::Uuid;

use finchat_agent::{TurnError, TurnOrchestrator, TurnReply};
use finchat_core::domain::conversation::{ChatMessage, ConversationState, Role};
use finchat_core::domain::record::PartialRecord;
use finchat_core::errors::{
    ApplicationError, InterfaceError, INTERNAL_ERROR_MESSAGE, INVALID_REQUEST_MESSAGE,
};

#[derive(Clone)]
pub struct ChatState {
    orchestrator: Arc<TurnOrchestrator>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<&ChatMessage> for HistoryEntry {
    fn from(message: &ChatMessage) -> Self {
        Self { role: message.role, content: message.content.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub history: Vec<HistoryEntry>,
    pub is_complete: bool,
}

impl From<TurnReply> for ChatResponse {
    fn from(reply: TurnReply) -> Self {
        Self {
            response: reply.response,
            session_id: reply.session_id.to_string(),
            history: reply.history.iter().map(HistoryEntry::from).collect(),
            is_complete: reply.is_complete,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub history: Vec<HistoryEntry>,
    pub pending_record: Option<PartialRecord>,
    pub awaiting_fields: Vec<String>,
}

impl From<ConversationState> for SessionView {
    fn from(state: ConversationState) -> Self {
        Self {
            session_id: state.session_id.to_string(),
            history: state.message_history.iter().map(HistoryEntry::from).collect(),
            pending_record: state.pending_record,
            awaiting_fields: state.awaiting_fields,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

pub struct ApiError(InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            message: self.0.user_message().to_string(),
            correlation_id: Some(self.0.correlation_id().to_string()),
        };
        (status, Json(body)).into_response()
    }
}

fn map_turn_error(error: TurnError, correlation_id: &str) -> ApiError {
    match &error {
        TurnError::InvalidRequest(_) | TurnError::SessionNotFound(_) => tracing::info!(
            event_name = "chat.request_rejected",
            correlation_id,
            error = %error,
            "chat request rejected"
        ),
        _ => tracing::error!(
            event_name = "chat.turn_failed",
            correlation_id,
            error = %error,
            "chat turn failed"
        ),
    }
    ApiError(ApplicationError::from(error).into_interface(correlation_id))
}

pub fn router(orchestrator: Arc<TurnOrchestrator>) -> Router {
    Router::new()
        .route("/chat", post(post_chat))
        .route("/chat/{session_id}", get(get_session))
        .with_state(ChatState { orchestrator })
        .layer(CatchPanicLayer::custom(panic_response))
}

pub async fn post_chat(
    State(state): State<ChatState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let Json(request) = payload.map_err(|rejection| {
        tracing::info!(
            event_name = "chat.request_rejected",
            correlation_id = %correlation_id,
            error = %rejection,
            "chat body could not be decoded"
        );
        ApiError(InterfaceError::BadRequest {
            message: INVALID_REQUEST_MESSAGE.to_string(),
            correlation_id: correlation_id.clone(),
        })
    })?;

    let session_id = request.session_id.as_deref().filter(|id| !id.trim().is_empty());
    let reply = state
        .orchestrator
        .handle_turn(&request.message, session_id)
        .await
        .map_err(|error| map_turn_error(error, &correlation_id))?;
    Ok(Json(ChatResponse::from(reply)))
}

pub async fn get_session(
    State(state): State<ChatState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let snapshot = state
        .orchestrator
        .inspect(&session_id)
        .await
        .map_err(|error| map_turn_error(error, &correlation_id))?;
    Ok(Json(SessionView::from(snapshot)))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    tracing::error!(event_name = "chat.handler_panicked", detail, "request handler panicked");

    let body = ErrorBody { message: INTERNAL_ERROR_MESSAGE.to_string(), correlation_id: None };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

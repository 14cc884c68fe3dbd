use thiserror::Error;

use crate::{domain::record::RecordType, flows::FlowTransitionError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid session id `{0}`")]
    InvalidSessionId(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("{record_type} record is missing fields: {missing_fields:?}")]
    IncompleteRecord { record_type: RecordType, missing_fields: Vec<String> },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("internal failure: {0}")]
    Internal(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

/// Caller-facing error. `message` is always safe to show to the user; the
/// underlying detail is logged where the failure is mapped.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

pub const INVALID_REQUEST_MESSAGE: &str = "Invalid request";
pub const SESSION_NOT_FOUND_MESSAGE: &str = "Session not found";
pub const AI_UNAVAILABLE_MESSAGE: &str = "AI Service Temporarily Unavailable";
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";
pub const DATABASE_ERROR_MESSAGE: &str = "Database Error";

impl InterfaceError {
    pub fn user_message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::NotFound { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(_) => {
                Self::BadRequest { message: INVALID_REQUEST_MESSAGE.to_owned(), correlation_id }
            }
            ApplicationError::NotFound(_) => {
                Self::NotFound { message: SESSION_NOT_FOUND_MESSAGE.to_owned(), correlation_id }
            }
            ApplicationError::Integration(_) => Self::ServiceUnavailable {
                message: AI_UNAVAILABLE_MESSAGE.to_owned(),
                correlation_id,
            },
            ApplicationError::Persistence(_) => {
                Self::Internal { message: DATABASE_ERROR_MESSAGE.to_owned(), correlation_id }
            }
            ApplicationError::Internal(_) | ApplicationError::Configuration(_) => {
                Self::Internal { message: INTERNAL_ERROR_MESSAGE.to_owned(), correlation_id }
            }
        }
    }
}

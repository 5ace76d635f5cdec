use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error{}", .0.as_ref().map_or("".to_string(), |s| format!(": {}", s)))]
    Internal(Option<String>),
}

/// Stable token for the response envelope; clients branch on this,
/// never on the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Unauthenticated,
    PermissionDenied,
    InvalidArgument,
    FailedPrecondition,
    AlreadyExists,
    NotFound,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Unauthenticated => ErrorKind::Unauthenticated,
            AppError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            AppError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            AppError::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            AppError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            AppError::NotFound(_) => ErrorKind::NotFound,
            // Conflicts that escape the retry loop are an infrastructure
            // problem, not something the caller can act on.
            AppError::Conflict(_) => ErrorKind::Internal,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn internal_message(message: impl Into<String>) -> Self {
        AppError::Internal(Some(message.into()))
    }

    pub fn internal() -> Self {
        AppError::Internal(None)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        log::error!("Anyhow error: {}", error);
        AppError::Internal(Some(error.to_string()))
    }
}

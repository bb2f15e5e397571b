use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("STORE_UNAVAILABLE: {0}")]
    StoreUnavailable(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("NOT_FOUND_LOCALLY: {0}")]
    NotFoundLocally(String),
    #[error("INVALID: {0}")]
    Invalid(String),
    #[error("CANCELLED")]
    Cancelled,
    #[error("INTERNAL: {0}")]
    Internal(String),
}

/// Error kinds surfaced to list observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    StoreUnavailable,
    NotFound,
    NotFoundLocally,
}

impl AppError {
    /// Observer-facing kind. Superseded operations have none and stay silent.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Cancelled => None,
            Self::NotFound(_) => Some(ErrorKind::NotFound),
            Self::NotFoundLocally(_) => Some(ErrorKind::NotFoundLocally),
            Self::StoreUnavailable(_) | Self::Invalid(_) | Self::Internal(_) => {
                Some(ErrorKind::StoreUnavailable)
            }
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::StoreUnavailable(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::StoreUnavailable(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

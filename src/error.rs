use thiserror::Error;

use crate::monitoring::store::StoreError;

/// Errors surfaced by task and subscription management.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Limit reached: {0}")]
    LimitReached(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => AppError::NotFound(msg),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::DatabaseError(other.to_string()),
        }
    }
}

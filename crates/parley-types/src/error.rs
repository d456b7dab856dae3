use thiserror::Error;

use crate::llm::LlmError;

/// Errors from repository operations (used by trait definitions in parley-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors surfaced by chat operations.
///
/// `NotFound` and `Validation` are raised before any side effect.
/// `Provider` and `Persistence` carry the failing collaborator's error.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat not found")]
    NotFound,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("completion provider failed: {0}")]
    Provider(#[from] LlmError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] RepositoryError),
}

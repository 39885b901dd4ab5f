//! Error types for runtime operations.

use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors surfaced by the container runtime.
///
/// The lifecycle engine branches on these kinds: `Unavailable` is
/// retryable (registry fallback, supervisor retry), `NotFound` and
/// `Conflict` drive idempotent paths, `Rejected` is definitive.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    #[error("operation rejected: {0}")]
    Rejected(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RuntimeError::Conflict(_))
    }
}

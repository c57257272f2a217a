//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every guarded operation fails with one of these. They are deterministic:
/// retrying the same command against the same state fails the same way, with
/// the exception of `Conflict`, which signals a stale version.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input, rejected before any aggregate is touched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The guarded transition's precondition does not hold in the current state.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// The targeted aggregate does not exist.
    #[error("not found")]
    NotFound,

    /// Optimistic concurrency conflict (stale version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn state_conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// Reject empty (or whitespace-only) text fields.
pub fn require_text(field: &str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Reject zero quantities.
pub fn require_positive(field: &str, value: u32) -> DomainResult<()> {
    if value == 0 {
        return Err(DomainError::validation(format!("{field} must be positive")));
    }
    Ok(())
}

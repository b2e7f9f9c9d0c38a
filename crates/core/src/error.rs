//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic failures only (malformed values, broken invariants, stale
/// versions). Storage and runtime failures live in the infrastructure crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier did not match its `<prefix>_<value>` form.
    #[error("invalid {prefix} identifier '{input}': {reason}")]
    InvalidId {
        prefix: &'static str,
        input: String,
        reason: String,
    },

    /// A requested resource was not found.
    #[error("not found")]
    NotFound,

    /// Stale version / optimistic concurrency mismatch.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(prefix: &'static str, input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidId {
            prefix,
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}

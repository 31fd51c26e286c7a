//! Error types for cohort coordination
//!
//! Errors fall into four classes: transient conflicts (retried locally),
//! configuration errors (logged, operation skipped), external-service
//! failures (degraded to "no reply") and invariant violations (fatal to the
//! operation, transaction aborted).

use thiserror::Error;

use crate::state::StoreError;
use crate::state::ParticipantStatus;
use crate::transfer::ConditionError;

/// Errors raised by coordination operations
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("condition assignment failed: {0}")]
    Condition(#[from] ConditionError),

    #[error("{operation} gave up after {attempts} conflicting attempts")]
    RetriesExhausted { operation: String, attempts: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: ParticipantStatus,
        to: ParticipantStatus,
    },

    #[error("cohort is locked")]
    CohortLocked,

    #[error("cohort is full")]
    CohortFull,
}

impl CoordinationError {
    /// Shorthand for a missing document of the given kind
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the caller may expect a later invocation to succeed
    ///
    /// Conflicts and exhausted retries are transient: the next relevant
    /// document write re-invokes the reactor against fresh state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Conflict { .. }) | Self::RetriesExhausted { .. }
        )
    }

    /// Whether this error stems from experiment configuration
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Condition(_))
    }
}

/// Result type for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;

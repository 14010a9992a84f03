//! Error types for stixrule.
//!
//! All errors are strongly typed using thiserror so callers can pattern
//! match on specific conditions. Bundle content conflicts are not errors:
//! they surface as a boolean from `BundleBuilder::can_add_objects`.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors that occur while checking inputs at the boundary.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Confidence value {value} is out of range [0, 100]")]
    ConfidenceOutOfRange {
        value: i64,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' is invalid: {reason}")]
    InvalidField {
        field: String,
        reason: String,
    },

    #[error("Invalid rule definition '{rule_id}': {reason}")]
    InvalidRuleDefinition {
        rule_id: String,
        reason: String,
    },

    #[error("Duplicate rule id: {rule_id}")]
    DuplicateRule {
        rule_id: String,
    },
}

/// Execution errors that occur while running rules.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Rule not found: {rule_id}")]
    RuleNotFound {
        rule_id: String,
    },

    #[error("Cascade depth limit {limit} reached while processing {event_id}")]
    CascadeLimitExceeded {
        limit: usize,
        event_id: String,
    },

    #[error("Rule queue is full (capacity: {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Rule runtime is disconnected")]
    Disconnected,

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for stixrule.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl InferenceError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a storage (collaborator) error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if the event dispatcher may retry the whole event.
    ///
    /// The engine itself never retries; a failed `apply` leaves earlier
    /// emissions of the same call committed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::QueueFull { .. } | ExecutionError::Timeout { .. }
            ),
            Self::Storage(e) => matches!(
                e,
                StorageError::BackendError(_) | StorageError::ConnectionError(_)
            ),
        }
    }
}

/// Result type alias for stixrule operations.
pub type InferenceResult<T> = Result<T, InferenceError>;

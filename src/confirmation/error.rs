//! Confirmation error taxonomy.

use thiserror::Error;

/// What a caller should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// Submitting again (new challenge or corrected text) is meaningful.
    Retry,
    /// The user intentionally stopped the operation.
    Stopped,
    /// The guard is saturated; try again later.
    Wait,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfirmationError {
    #[error("too many pending confirmations (limit: {limit})")]
    CapacityExceeded { limit: usize },

    #[error("Invalid or expired confirmation request")]
    UnknownCorrelation { correlation_id: String },

    #[error("Operation '{tool_name}' was denied by user")]
    DeniedByUser { tool_name: String },

    #[error("Confirmation text for '{tool_name}' does not match the required phrase")]
    InvalidConfirmationText { tool_name: String },

    #[error("correlation id {correlation_id} is already pending")]
    DuplicateCorrelation { correlation_id: String },

    #[error("confirmation {correlation_id} timed out")]
    Timeout { correlation_id: String },

    #[error("parameter validation failed: {}", errors.join("; "))]
    ValidationFailure { errors: Vec<String> },

    #[error("rate limit exceeded for {operation} (caller: {caller})")]
    RateLimited { operation: String, caller: String },
}

impl ConfirmationError {
    pub fn retry_hint(&self) -> RetryHint {
        match self {
            ConfirmationError::CapacityExceeded { .. } | ConfirmationError::RateLimited { .. } => {
                RetryHint::Wait
            }
            ConfirmationError::DeniedByUser { .. } => RetryHint::Stopped,
            ConfirmationError::UnknownCorrelation { .. }
            | ConfirmationError::DuplicateCorrelation { .. }
            | ConfirmationError::InvalidConfirmationText { .. }
            | ConfirmationError::Timeout { .. }
            | ConfirmationError::ValidationFailure { .. } => RetryHint::Retry,
        }
    }
}

pub type ConfirmationResult<T> = Result<T, ConfirmationError>;

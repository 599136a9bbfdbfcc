//! Guard events: broadcast channel for observers.
//!
//! Best-effort delivery: if a subscriber falls behind, `Lagged` errors
//! skip events. The audit sink remains the record of truth.

/// Events emitted by `ToolCallGuard`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    /// A call passed every check and may run.
    CallAllowed {
        tool_name: String,
        caller: Option<String>,
    },
    /// A dangerous call was held back pending confirmation.
    ConfirmationRequired {
        tool_name: String,
        correlation_id: String,
    },
    /// A confirmation response was processed.
    ConfirmationResolved {
        correlation_id: String,
        allowed: bool,
    },
    ConfirmationCancelled {
        correlation_id: String,
    },
    RateLimited {
        tool_name: String,
        caller: Option<String>,
    },
    ValidationRejected {
        tool_name: String,
        errors: usize,
    },
}

//! Operation-level error taxonomy surfaced to callers.
//!
//! Expected business outcomes (duplicate operation, wrong state, exhausted
//! retries) are `Err` variants here, not panics; callers are forced to handle
//! them explicitly. Infrastructure faults from the store or the transition
//! driver are wrapped transparently so their detail is preserved.

use crate::state_machine::StateMachineError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ExitFeeError {
    /// Another non-terminal operation already exists for this user.
    #[error("another exit fee operation is already in progress")]
    OperationInProgress,

    /// The requested action is not valid for the operation's current state,
    /// or the operation itself is malformed (missing team, full team).
    #[error("invalid exit fee operation")]
    InvalidOperation,

    /// Payment could not be completed; the reason is the classified cause.
    #[error("payment failed: {0}")]
    PaymentFailed(String),

    /// The team mutation failed after payment was confirmed.
    #[error("team changes failed: {0}")]
    TeamChangesFailed(String),

    /// All payment attempts were consumed without a verified payment.
    #[error("maximum payment retries exceeded")]
    MaxRetriesExceeded,

    /// The operation aged past the staleness threshold before payment.
    #[error("exit fee operation has expired")]
    OperationExpired,

    /// Payment succeeded but the team mutation cannot be completed
    /// automatically; operator remediation is required.
    #[error("operation requires manual compensation")]
    CompensationRequired,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
}

pub type Result<T> = std::result::Result<T, ExitFeeError>;

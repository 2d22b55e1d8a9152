use crate::state_machine::states::ExitFeeStatus;
use crate::store::StoreError;

/// Errors raised while driving an operation through its transition graph.
#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    /// The requested event is not legal from the current state.
    #[error("invalid transition from {from} via {event}")]
    InvalidTransition {
        from: ExitFeeStatus,
        event: &'static str,
    },

    /// The transition could not be persisted.
    #[error("transition persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

pub type StateMachineResult<T> = std::result::Result<T, StateMachineError>;

// State machine for exit fee operations.
//
// Typed events drive a forward-only transition graph; every transition is
// persisted through the operation store before the next external call is
// attempted, and published to the observability channel afterwards.

pub mod errors;
pub mod events;
pub mod machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::ExitFeeEvent;
pub use machine::{next_status, OperationStateMachine};
pub use states::{ExitFeeStatus, TeamSwitchStatus};

//! # exitfee-core
//!
//! Saga engine for Lightning exit-fee payments that gate team membership
//! changes. A user may leave or switch teams only after a fixed fee is paid
//! to a platform-controlled address and independently verified as received;
//! this crate owns the multi-step, partially-external, partially-
//! irreversible workflow that makes that safe across process restarts,
//! network failures, and concurrent attempts.
//!
//! ## Architecture
//!
//! - [`models`]: the `ExitFeeOperation` aggregate and its team-switch audit
//!   record.
//! - [`state_machine`]: typed events over a forward-only transition graph;
//!   every transition persisted before the next external call.
//! - [`store`]: the operation store trait, Postgres and in-memory
//!   implementations; enforces the one-active-operation-per-user invariant.
//! - [`gateway`]: payment provider and team membership boundaries,
//!   consumed as traits.
//! - [`orchestration`]: the orchestrator (initiate, pay with retries,
//!   mutate team, cancel, resume, expire, compensate), the error
//!   classifier/retry policy, and the admission guard.
//! - [`events`]: typed lifecycle events over a broadcast channel.

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod store;

pub use config::ExitFeeConfig;
pub use error::{ExitFeeError, Result};
pub use events::{EventPublisher, OperationEvent};
pub use gateway::{
    GatewayError, LightningInvoice, PaymentGateway, PaymentResult, Team, TeamError, TeamService,
};
pub use models::{ExitFeeOperation, NewExitFeeOperation, OperationType, TeamSwitchOperation};
pub use orchestration::{ErrorCategory, ExitFeeOrchestrator, ResumeReport, RetryPolicy};
pub use state_machine::{ExitFeeEvent, ExitFeeStatus, TeamSwitchStatus};
pub use store::{InMemoryOperationStore, OperationStore, PgOperationStore, StoreError};

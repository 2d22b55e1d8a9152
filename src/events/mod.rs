// Typed domain events for exit fee operations.
//
// A tagged union consumed through the broadcast publisher replaces any
// string-keyed event bus: subscribers match on variants, not on names.

pub mod publisher;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::orchestration::error_classifier::ErrorCategory;
use crate::state_machine::ExitFeeStatus;

pub use publisher::EventPublisher;

/// Everything the saga reports about itself. Emission is fire-and-forget;
/// saga correctness never depends on anyone listening.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationEvent {
    /// One edge of the state machine was persisted.
    StateTransition {
        operation_id: Uuid,
        user_id: String,
        from: ExitFeeStatus,
        to: ExitFeeStatus,
        /// How long the work leading to this transition took.
        duration: Duration,
        published_at: DateTime<Utc>,
    },
    /// One payment attempt finished, successfully or not.
    PaymentAttempt {
        operation_id: Uuid,
        user_id: String,
        attempt_number: u32,
        success: bool,
        error_category: Option<ErrorCategory>,
        published_at: DateTime<Utc>,
    },
    /// The team mutation half of the saga finished.
    TeamSwitch {
        operation_id: Uuid,
        user_id: String,
        from_team_id: Option<String>,
        to_team_id: Option<String>,
        duration: Duration,
        success: bool,
        published_at: DateTime<Utc>,
    },
}

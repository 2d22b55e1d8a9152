//! # Exit Fee Operation Model
//!
//! The aggregate root of the payment saga. One row per leave-or-switch
//! attempt, created by `initiate`, mutated only through state machine
//! transitions, never deleted (audit trail), immutable once terminal.
//!
//! Maps to the `exit_fee_payments` table:
//! - `id`: primary key (UUID)
//! - `user_id`: owner; at most one non-terminal row per user, enforced by a
//!   partial unique index
//! - `amount` / `lightning_address`: platform policy, fixed at creation
//! - `payment_status`: current state machine state
//! - `payment_hash`: set only after the gateway confirmed a payment; the key
//!   for idempotent re-verification
//! - `invoice_text`: most recently issued invoice, replaced on every retry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::state_machine::ExitFeeStatus;

/// Whether an operation leaves a team outright or switches to another.
/// Derived from the destination field, never stored separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Leave,
    Switch,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leave => write!(f, "leave"),
            Self::Switch => write!(f, "switch"),
        }
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leave" => Ok(Self::Leave),
            "switch" => Ok(Self::Switch),
            _ => Err(format!("Invalid operation type: {s}")),
        }
    }
}

/// One exit fee payment attempt and its full saga state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitFeeOperation {
    pub id: Uuid,
    pub payment_intent_id: Uuid,
    pub user_id: String,
    pub from_team_id: Option<String>,
    pub to_team_id: Option<String>,
    /// Fee in satoshis; fixed at creation, never read from user input.
    pub amount: i64,
    /// Platform receiving address for this fee.
    pub lightning_address: String,
    pub status: ExitFeeStatus,
    pub payment_hash: Option<String>,
    pub invoice_text: Option<String>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExitFeeOperation {
    /// Switch if a destination team is present, leave otherwise.
    pub fn operation_type(&self) -> OperationType {
        if self.to_team_id.is_some() {
            OperationType::Switch
        } else {
            OperationType::Leave
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// A failed-or-stuck operation whose payment was confirmed received;
    /// these require operator compensation, never silent dropping.
    pub fn is_paid(&self) -> bool {
        self.payment_hash.is_some()
    }
}

/// Fields supplied when creating an operation. Everything else (id, status,
/// timestamps) is assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExitFeeOperation {
    pub user_id: String,
    pub from_team_id: Option<String>,
    pub to_team_id: Option<String>,
    pub amount: i64,
    pub lightning_address: String,
}

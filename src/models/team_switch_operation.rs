//! Subordinate audit record for the team-mutation half of the saga.
//!
//! Links back to the exit fee payment via `exit_fee_payment_id` and walks
//! `pending -> processing -> completed | failed | rolled_back` independently
//! of the payment, so a confirmed payment with a failed mutation is visible
//! as exactly that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::exit_fee_operation::OperationType;
use crate::state_machine::TeamSwitchStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSwitchOperation {
    pub id: Uuid,
    pub user_id: String,
    pub from_team_id: Option<String>,
    pub to_team_id: Option<String>,
    pub exit_fee_payment_id: Uuid,
    pub operation_type: OperationType,
    pub status: TeamSwitchStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTeamSwitchOperation {
    pub user_id: String,
    pub from_team_id: Option<String>,
    pub to_team_id: Option<String>,
    pub exit_fee_payment_id: Uuid,
    pub operation_type: OperationType,
}

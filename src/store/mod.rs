//! # Operation Store
//!
//! Durable record of every exit fee operation and its status; the single
//! source of truth for the saga. All components read and write it through
//! the orchestrator's transition calls, never directly.
//!
//! The store, not the in-process guard, enforces the single-flight
//! invariant: `insert_operation` is a conditional insert that fails with
//! [`StoreError::DuplicateActiveOperation`] when the user already has a
//! non-terminal operation. The Postgres implementation backs this with a
//! partial unique index; the in-memory implementation checks the same
//! predicate under a write lock.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    ExitFeeOperation, NewExitFeeOperation, NewTeamSwitchOperation, TeamSwitchOperation,
};
use crate::state_machine::{ExitFeeStatus, TeamSwitchStatus};

pub use memory::InMemoryOperationStore;
pub use postgres::PgOperationStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("exit fee operation {0} not found")]
    OperationNotFound(Uuid),

    #[error("team switch record {0} not found")]
    TeamSwitchNotFound(Uuid),

    /// The single-flight invariant rejected the insert.
    #[error("user {0} already has an active exit fee operation")]
    DuplicateActiveOperation(String),

    /// A persisted row no longer parses (unknown status string).
    #[error("corrupt operation record: {0}")]
    Corrupt(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Optional fields riding along with a status transition. Absent fields
/// keep their stored values.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub payment_hash: Option<String>,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payment_hash(mut self, hash: impl Into<String>) -> Self {
        self.payment_hash = Some(hash.into());
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Conditional insert: creates the operation in `initiated` unless the
    /// user already has a non-terminal operation.
    async fn insert_operation(
        &self,
        new_operation: NewExitFeeOperation,
    ) -> Result<ExitFeeOperation, StoreError>;

    async fn get_operation(&self, operation_id: Uuid) -> Result<ExitFeeOperation, StoreError>;

    /// Persist a status transition. `completed_at` is stamped exactly when
    /// the status becomes `team_change_complete`.
    async fn update_status(
        &self,
        operation_id: Uuid,
        status: ExitFeeStatus,
        update: StatusUpdate,
    ) -> Result<(), StoreError>;

    /// Replace the stored invoice and advance to `invoice_created`.
    /// Previous invoices are abandoned, not reused.
    async fn update_invoice(
        &self,
        operation_id: Uuid,
        invoice_text: &str,
    ) -> Result<(), StoreError>;

    async fn update_retry_count(
        &self,
        operation_id: Uuid,
        retry_count: i32,
    ) -> Result<(), StoreError>;

    async fn list_by_status(
        &self,
        status: ExitFeeStatus,
    ) -> Result<Vec<ExitFeeOperation>, StoreError>;

    /// Every non-terminal operation, used to rebuild the admission guard
    /// at startup.
    async fn list_active(&self) -> Result<Vec<ExitFeeOperation>, StoreError>;

    /// Operations created before `cutoff` that never reached
    /// `payment_confirmed`; candidates for expiry.
    async fn list_stale(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ExitFeeOperation>, StoreError>;

    async fn insert_team_switch(
        &self,
        new_switch: NewTeamSwitchOperation,
    ) -> Result<TeamSwitchOperation, StoreError>;

    async fn update_team_switch_status(
        &self,
        switch_id: Uuid,
        status: TeamSwitchStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn find_team_switch_for_payment(
        &self,
        exit_fee_payment_id: Uuid,
    ) -> Result<Option<TeamSwitchOperation>, StoreError>;
}

//! In-memory operation store.
//!
//! Same contract as the Postgres store, including the single-flight insert,
//! held behind one write lock. Used by the test suites and for embedded
//! runs that do not need durability.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{OperationStore, StatusUpdate, StoreError};
use crate::models::{
    ExitFeeOperation, NewExitFeeOperation, NewTeamSwitchOperation, TeamSwitchOperation,
};
use crate::state_machine::{ExitFeeStatus, TeamSwitchStatus};

#[derive(Default)]
struct Tables {
    operations: HashMap<Uuid, ExitFeeOperation>,
    team_switches: HashMap<Uuid, TeamSwitchOperation>,
}

#[derive(Default)]
pub struct InMemoryOperationStore {
    tables: RwLock<Tables>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperationStore for InMemoryOperationStore {
    async fn insert_operation(
        &self,
        new_operation: NewExitFeeOperation,
    ) -> Result<ExitFeeOperation, StoreError> {
        let mut tables = self.tables.write();

        let duplicate = tables
            .operations
            .values()
            .any(|op| op.user_id == new_operation.user_id && !op.is_terminal());
        if duplicate {
            return Err(StoreError::DuplicateActiveOperation(new_operation.user_id));
        }

        let operation = ExitFeeOperation {
            id: Uuid::new_v4(),
            payment_intent_id: Uuid::new_v4(),
            user_id: new_operation.user_id,
            from_team_id: new_operation.from_team_id,
            to_team_id: new_operation.to_team_id,
            amount: new_operation.amount,
            lightning_address: new_operation.lightning_address,
            status: ExitFeeStatus::Initiated,
            payment_hash: None,
            invoice_text: None,
            retry_count: 0,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        };

        tables.operations.insert(operation.id, operation.clone());
        Ok(operation)
    }

    async fn get_operation(&self, operation_id: Uuid) -> Result<ExitFeeOperation, StoreError> {
        self.tables
            .read()
            .operations
            .get(&operation_id)
            .cloned()
            .ok_or(StoreError::OperationNotFound(operation_id))
    }

    async fn update_status(
        &self,
        operation_id: Uuid,
        status: ExitFeeStatus,
        update: StatusUpdate,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let operation = tables
            .operations
            .get_mut(&operation_id)
            .ok_or(StoreError::OperationNotFound(operation_id))?;

        operation.status = status;
        if let Some(hash) = update.payment_hash {
            operation.payment_hash = Some(hash);
        }
        if let Some(message) = update.error_message {
            operation.error_message = Some(message);
        }
        if status == ExitFeeStatus::TeamChangeComplete {
            operation.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn update_invoice(
        &self,
        operation_id: Uuid,
        invoice_text: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let operation = tables
            .operations
            .get_mut(&operation_id)
            .ok_or(StoreError::OperationNotFound(operation_id))?;

        operation.invoice_text = Some(invoice_text.to_string());
        operation.status = ExitFeeStatus::InvoiceCreated;
        Ok(())
    }

    async fn update_retry_count(
        &self,
        operation_id: Uuid,
        retry_count: i32,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let operation = tables
            .operations
            .get_mut(&operation_id)
            .ok_or(StoreError::OperationNotFound(operation_id))?;

        operation.retry_count = retry_count;
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: ExitFeeStatus,
    ) -> Result<Vec<ExitFeeOperation>, StoreError> {
        Ok(self
            .tables
            .read()
            .operations
            .values()
            .filter(|op| op.status == status)
            .cloned()
            .collect())
    }

    async fn list_active(&self) -> Result<Vec<ExitFeeOperation>, StoreError> {
        Ok(self
            .tables
            .read()
            .operations
            .values()
            .filter(|op| !op.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_stale(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ExitFeeOperation>, StoreError> {
        Ok(self
            .tables
            .read()
            .operations
            .values()
            .filter(|op| op.status.is_expirable() && op.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn insert_team_switch(
        &self,
        new_switch: NewTeamSwitchOperation,
    ) -> Result<TeamSwitchOperation, StoreError> {
        let record = TeamSwitchOperation {
            id: Uuid::new_v4(),
            user_id: new_switch.user_id,
            from_team_id: new_switch.from_team_id,
            to_team_id: new_switch.to_team_id,
            exit_fee_payment_id: new_switch.exit_fee_payment_id,
            operation_type: new_switch.operation_type,
            status: TeamSwitchStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        };

        self.tables
            .write()
            .team_switches
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_team_switch_status(
        &self,
        switch_id: Uuid,
        status: TeamSwitchStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let record = tables
            .team_switches
            .get_mut(&switch_id)
            .ok_or(StoreError::TeamSwitchNotFound(switch_id))?;

        record.status = status;
        if let Some(message) = error_message {
            record.error_message = Some(message.to_string());
        }
        if status.is_terminal() {
            record.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn find_team_switch_for_payment(
        &self,
        exit_fee_payment_id: Uuid,
    ) -> Result<Option<TeamSwitchOperation>, StoreError> {
        Ok(self
            .tables
            .read()
            .team_switches
            .values()
            .filter(|record| record.exit_fee_payment_id == exit_fee_payment_id)
            .max_by_key(|record| record.created_at)
            .cloned())
    }
}

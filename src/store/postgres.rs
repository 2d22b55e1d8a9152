//! Postgres-backed operation store.
//!
//! Statuses are stored as their snake_case wire strings. The single-flight
//! invariant lives in the schema: a partial unique index on `user_id`
//! filtered to non-terminal statuses makes the insert conditional, so a
//! second instance of the orchestrator cannot double-admit a user even
//! though each instance's guard is process-local.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{OperationStore, StatusUpdate, StoreError};
use crate::models::{
    ExitFeeOperation, NewExitFeeOperation, NewTeamSwitchOperation, TeamSwitchOperation,
};
use crate::state_machine::{ExitFeeStatus, TeamSwitchStatus};

const OPERATION_COLUMNS: &str = "id, payment_intent_id, user_id, from_team_id, to_team_id, \
     amount, lightning_address, payment_status, payment_hash, invoice_text, \
     retry_count, error_message, created_at, completed_at";

const TEAM_SWITCH_COLUMNS: &str = "id, user_id, from_team_id, to_team_id, exit_fee_payment_id, \
     operation_type, status, error_message, created_at, completed_at";

pub struct PgOperationStore {
    pool: PgPool,
}

impl PgOperationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the crate's migrations (operation + audit tables and the
    /// single-flight partial index).
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct ExitFeeOperationRow {
    id: Uuid,
    payment_intent_id: Uuid,
    user_id: String,
    from_team_id: Option<String>,
    to_team_id: Option<String>,
    amount: i64,
    lightning_address: String,
    payment_status: String,
    payment_hash: Option<String>,
    invoice_text: Option<String>,
    retry_count: i32,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ExitFeeOperationRow> for ExitFeeOperation {
    type Error = StoreError;

    fn try_from(row: ExitFeeOperationRow) -> Result<Self, Self::Error> {
        let status = row
            .payment_status
            .parse::<ExitFeeStatus>()
            .map_err(StoreError::Corrupt)?;

        Ok(ExitFeeOperation {
            id: row.id,
            payment_intent_id: row.payment_intent_id,
            user_id: row.user_id,
            from_team_id: row.from_team_id,
            to_team_id: row.to_team_id,
            amount: row.amount,
            lightning_address: row.lightning_address,
            status,
            payment_hash: row.payment_hash,
            invoice_text: row.invoice_text,
            retry_count: row.retry_count,
            error_message: row.error_message,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TeamSwitchOperationRow {
    id: Uuid,
    user_id: String,
    from_team_id: Option<String>,
    to_team_id: Option<String>,
    exit_fee_payment_id: Uuid,
    operation_type: String,
    status: String,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TeamSwitchOperationRow> for TeamSwitchOperation {
    type Error = StoreError;

    fn try_from(row: TeamSwitchOperationRow) -> Result<Self, Self::Error> {
        let operation_type = row.operation_type.parse().map_err(StoreError::Corrupt)?;
        let status = row
            .status
            .parse::<TeamSwitchStatus>()
            .map_err(StoreError::Corrupt)?;

        Ok(TeamSwitchOperation {
            id: row.id,
            user_id: row.user_id,
            from_team_id: row.from_team_id,
            to_team_id: row.to_team_id,
            exit_fee_payment_id: row.exit_fee_payment_id,
            operation_type,
            status,
            error_message: row.error_message,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[async_trait]
impl OperationStore for PgOperationStore {
    async fn insert_operation(
        &self,
        new_operation: NewExitFeeOperation,
    ) -> Result<ExitFeeOperation, StoreError> {
        // ON CONFLICT DO NOTHING collapses the partial-unique-index race
        // into "no row returned": either we created the row or some other
        // writer holds the user's active slot.
        let query = format!(
            "INSERT INTO exit_fee_payments \
             (id, payment_intent_id, user_id, from_team_id, to_team_id, \
              amount, lightning_address, payment_status, retry_count, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, NOW()) \
             ON CONFLICT DO NOTHING \
             RETURNING {OPERATION_COLUMNS}"
        );

        let row = sqlx::query_as::<_, ExitFeeOperationRow>(&query)
            .bind(Uuid::new_v4())
            .bind(Uuid::new_v4())
            .bind(&new_operation.user_id)
            .bind(&new_operation.from_team_id)
            .bind(&new_operation.to_team_id)
            .bind(new_operation.amount)
            .bind(&new_operation.lightning_address)
            .bind(ExitFeeStatus::Initiated.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(StoreError::DuplicateActiveOperation(new_operation.user_id)),
        }
    }

    async fn get_operation(&self, operation_id: Uuid) -> Result<ExitFeeOperation, StoreError> {
        let query =
            format!("SELECT {OPERATION_COLUMNS} FROM exit_fee_payments WHERE id = $1");

        let row = sqlx::query_as::<_, ExitFeeOperationRow>(&query)
            .bind(operation_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::OperationNotFound(operation_id))?;

        row.try_into()
    }

    async fn update_status(
        &self,
        operation_id: Uuid,
        status: ExitFeeStatus,
        update: StatusUpdate,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE exit_fee_payments \
             SET payment_status = $2, \
                 payment_hash = COALESCE($3, payment_hash), \
                 error_message = COALESCE($4, error_message), \
                 completed_at = CASE WHEN $2 = 'team_change_complete' \
                                     THEN NOW() ELSE completed_at END \
             WHERE id = $1",
        )
        .bind(operation_id)
        .bind(status.to_string())
        .bind(update.payment_hash)
        .bind(update.error_message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OperationNotFound(operation_id));
        }
        Ok(())
    }

    async fn update_invoice(
        &self,
        operation_id: Uuid,
        invoice_text: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE exit_fee_payments \
             SET invoice_text = $2, payment_status = $3 \
             WHERE id = $1",
        )
        .bind(operation_id)
        .bind(invoice_text)
        .bind(ExitFeeStatus::InvoiceCreated.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OperationNotFound(operation_id));
        }
        Ok(())
    }

    async fn update_retry_count(
        &self,
        operation_id: Uuid,
        retry_count: i32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE exit_fee_payments SET retry_count = $2 WHERE id = $1")
            .bind(operation_id)
            .bind(retry_count)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OperationNotFound(operation_id));
        }
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: ExitFeeStatus,
    ) -> Result<Vec<ExitFeeOperation>, StoreError> {
        let query = format!(
            "SELECT {OPERATION_COLUMNS} FROM exit_fee_payments \
             WHERE payment_status = $1 ORDER BY created_at"
        );

        let rows = sqlx::query_as::<_, ExitFeeOperationRow>(&query)
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_active(&self) -> Result<Vec<ExitFeeOperation>, StoreError> {
        let query = format!(
            "SELECT {OPERATION_COLUMNS} FROM exit_fee_payments \
             WHERE payment_status NOT IN \
                   ('team_change_complete', 'failed', 'expired', 'compensated') \
             ORDER BY created_at"
        );

        let rows = sqlx::query_as::<_, ExitFeeOperationRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_stale(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ExitFeeOperation>, StoreError> {
        let query = format!(
            "SELECT {OPERATION_COLUMNS} FROM exit_fee_payments \
             WHERE payment_status IN ('initiated', 'invoice_created', 'payment_sent') \
               AND created_at < $1 \
             ORDER BY created_at"
        );

        let rows = sqlx::query_as::<_, ExitFeeOperationRow>(&query)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_team_switch(
        &self,
        new_switch: NewTeamSwitchOperation,
    ) -> Result<TeamSwitchOperation, StoreError> {
        let query = format!(
            "INSERT INTO team_switch_operations \
             (id, user_id, from_team_id, to_team_id, exit_fee_payment_id, \
              operation_type, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) \
             RETURNING {TEAM_SWITCH_COLUMNS}"
        );

        let row = sqlx::query_as::<_, TeamSwitchOperationRow>(&query)
            .bind(Uuid::new_v4())
            .bind(&new_switch.user_id)
            .bind(&new_switch.from_team_id)
            .bind(&new_switch.to_team_id)
            .bind(new_switch.exit_fee_payment_id)
            .bind(new_switch.operation_type.to_string())
            .bind(TeamSwitchStatus::Pending.to_string())
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn update_team_switch_status(
        &self,
        switch_id: Uuid,
        status: TeamSwitchStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE team_switch_operations \
             SET status = $2, \
                 error_message = COALESCE($3, error_message), \
                 completed_at = CASE WHEN $2 IN ('completed', 'failed', 'rolled_back') \
                                     THEN NOW() ELSE completed_at END \
             WHERE id = $1",
        )
        .bind(switch_id)
        .bind(status.to_string())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TeamSwitchNotFound(switch_id));
        }
        Ok(())
    }

    async fn find_team_switch_for_payment(
        &self,
        exit_fee_payment_id: Uuid,
    ) -> Result<Option<TeamSwitchOperation>, StoreError> {
        let query = format!(
            "SELECT {TEAM_SWITCH_COLUMNS} FROM team_switch_operations \
             WHERE exit_fee_payment_id = $1 \
             ORDER BY created_at DESC LIMIT 1"
        );

        let row = sqlx::query_as::<_, TeamSwitchOperationRow>(&query)
            .bind(exit_fee_payment_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }
}

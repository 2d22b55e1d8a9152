//! # Exit Fee Orchestrator
//!
//! Drives an exit fee operation through its full lifecycle: create →
//! invoice → pay-with-retries → independently verify → mutate team
//! membership → complete. Also owns cancellation, startup resumption, the
//! staleness sweep, and the operator compensation surface.
//!
//! ## Overview
//!
//! The orchestrator is the only writer of operation state. It persists
//! every transition before attempting the next external call, so the stored
//! `payment_status` alone is sufficient to resume after a crash at any
//! suspension point. Payment success is never taken from the payment call's
//! response: the gateway must independently confirm that the platform
//! address recorded the payment before the saga advances past
//! `payment_confirmed`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use exitfee_core::config::ExitFeeConfig;
//! # use exitfee_core::orchestration::ExitFeeOrchestrator;
//! # use exitfee_core::store::InMemoryOperationStore;
//! # async fn example(
//! #     gateway: Arc<dyn exitfee_core::gateway::PaymentGateway>,
//! #     teams: Arc<dyn exitfee_core::gateway::TeamService>,
//! # ) -> exitfee_core::error::Result<()> {
//! let store = Arc::new(InMemoryOperationStore::new());
//! let orchestrator =
//!     ExitFeeOrchestrator::new(store, gateway, teams, ExitFeeConfig::default());
//!
//! orchestrator.resume_incomplete_operations().await?;
//!
//! let operation = orchestrator.initiate_team_leave("u1", "team-a").await?;
//! orchestrator.process_exit_fee_payment(operation.id).await?;
//! orchestrator.execute_team_changes(operation.id).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ExitFeeConfig;
use crate::error::{ExitFeeError, Result};
use crate::events::EventPublisher;
use crate::gateway::{GatewayError, PaymentGateway, PaymentResult, TeamService};
use crate::models::{
    ExitFeeOperation, NewExitFeeOperation, NewTeamSwitchOperation, OperationType,
};
use crate::orchestration::error_classifier::{
    categorize_gateway_error, severity, ErrorSeverity, RetryPolicy,
};
use crate::orchestration::guard::ActiveOperationGuard;
use crate::state_machine::{
    ExitFeeEvent, ExitFeeStatus, OperationStateMachine, TeamSwitchStatus,
};
use crate::store::OperationStore;

/// Outcome of the startup resumption scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResumeReport {
    /// Users re-registered in the admission guard.
    pub guard_entries_rebuilt: usize,
    /// `payment_confirmed` operations driven to completion.
    pub resumed: usize,
    /// `payment_sent` operations whose payment was re-verified as received.
    pub reverified: usize,
    /// Operations marked failed during resumption.
    pub failed: usize,
    /// `payment_sent` operations with no recorded payment hash, left for
    /// reconciliation or the staleness sweep.
    pub awaiting_reconciliation: usize,
}

/// A payment attempt fails either at the gateway (classified, possibly
/// retried) or in our own infrastructure (never retried: retrying a payment
/// we could not record risks paying twice).
enum AttemptError {
    Gateway(GatewayError),
    Infra(ExitFeeError),
}

impl From<crate::state_machine::StateMachineError> for AttemptError {
    fn from(error: crate::state_machine::StateMachineError) -> Self {
        Self::Infra(error.into())
    }
}

pub struct ExitFeeOrchestrator {
    store: Arc<dyn OperationStore>,
    gateway: Arc<dyn PaymentGateway>,
    teams: Arc<dyn TeamService>,
    publisher: EventPublisher,
    machine: OperationStateMachine,
    guard: ActiveOperationGuard,
    retry_policy: RetryPolicy,
    config: ExitFeeConfig,
}

impl ExitFeeOrchestrator {
    pub fn new(
        store: Arc<dyn OperationStore>,
        gateway: Arc<dyn PaymentGateway>,
        teams: Arc<dyn TeamService>,
        config: ExitFeeConfig,
    ) -> Self {
        let publisher = EventPublisher::new(config.event_channel_capacity);
        let machine = OperationStateMachine::new(store.clone(), publisher.clone());
        let retry_policy = RetryPolicy::new(config.retry.clone());

        Self {
            store,
            gateway,
            teams,
            publisher,
            machine,
            guard: ActiveOperationGuard::new(),
            retry_policy,
            config,
        }
    }

    /// Access the event channel, e.g. to attach a metrics subscriber.
    pub fn events(&self) -> &EventPublisher {
        &self.publisher
    }

    #[instrument(skip(self))]
    pub async fn initiate_team_leave(
        &self,
        user_id: &str,
        team_id: &str,
    ) -> Result<ExitFeeOperation> {
        self.initiate(user_id, Some(team_id.to_string()), None).await
    }

    #[instrument(skip(self))]
    pub async fn initiate_team_switch(
        &self,
        user_id: &str,
        from_team_id: &str,
        to_team_id: &str,
    ) -> Result<ExitFeeOperation> {
        self.initiate(
            user_id,
            Some(from_team_id.to_string()),
            Some(to_team_id.to_string()),
        )
        .await
    }

    /// Admission check, switch validation, and the conditional insert.
    /// Validation failures return before any store mutation.
    async fn initiate(
        &self,
        user_id: &str,
        from_team_id: Option<String>,
        to_team_id: Option<String>,
    ) -> Result<ExitFeeOperation> {
        if !self.guard.admit(user_id) {
            return Err(ExitFeeError::OperationInProgress);
        }

        let result = self
            .initiate_admitted(user_id, from_team_id, to_team_id)
            .await;
        if result.is_err() {
            self.guard.release(user_id);
        }
        result
    }

    async fn initiate_admitted(
        &self,
        user_id: &str,
        from_team_id: Option<String>,
        to_team_id: Option<String>,
    ) -> Result<ExitFeeOperation> {
        if let Some(destination) = &to_team_id {
            self.validate_switch_destination(destination).await?;
        }

        let operation = self
            .store
            .insert_operation(NewExitFeeOperation {
                user_id: user_id.to_string(),
                from_team_id,
                to_team_id,
                amount: self.config.fee_amount_sats,
                lightning_address: self.config.lightning_address.clone(),
            })
            .await
            .map_err(|error| match error {
                crate::store::StoreError::DuplicateActiveOperation(_) => {
                    ExitFeeError::OperationInProgress
                }
                other => other.into(),
            })?;

        info!(
            operation_id = %operation.id,
            user_id,
            operation_type = %operation.operation_type(),
            "initiated exit fee operation"
        );
        Ok(operation)
    }

    /// The destination team must exist and have room before any record is
    /// created.
    async fn validate_switch_destination(&self, team_id: &str) -> Result<()> {
        let team = self
            .teams
            .get_team(team_id)
            .await
            .map_err(|e| ExitFeeError::TeamChangesFailed(format!("team lookup failed: {e}")))?
            .ok_or(ExitFeeError::InvalidOperation)?;

        if !team.has_capacity() {
            return Err(ExitFeeError::InvalidOperation);
        }
        Ok(())
    }

    /// Execute the payment half of the saga: bounded retries, a fresh
    /// invoice per attempt, and independent receipt verification before
    /// `payment_confirmed` is recorded.
    #[instrument(skip(self))]
    pub async fn process_exit_fee_payment(&self, operation_id: Uuid) -> Result<PaymentResult> {
        let operation = self.store.get_operation(operation_id).await?;

        if !matches!(
            operation.status,
            ExitFeeStatus::Initiated | ExitFeeStatus::InvoiceCreated
        ) {
            return Err(ExitFeeError::InvalidOperation);
        }

        match self.pay_with_retries(&operation).await {
            Ok(payment) => Ok(payment),
            Err(error) => {
                self.fail_operation(operation_id, &error.to_string()).await;
                Err(error)
            }
        }
    }

    async fn pay_with_retries(&self, operation: &ExitFeeOperation) -> Result<PaymentResult> {
        let mut current = operation.clone();
        let max_retries = self.retry_policy.max_retries();

        for attempt in 1..=max_retries {
            debug!(
                operation_id = %current.id,
                attempt,
                max_retries,
                "payment attempt"
            );

            match self.attempt_payment(&mut current, attempt).await {
                Ok(payment) => {
                    self.publisher.payment_attempt(
                        current.id,
                        &current.user_id,
                        attempt,
                        true,
                        None,
                    );
                    info!(
                        operation_id = %current.id,
                        attempt,
                        payment_hash = %payment.payment_hash,
                        "payment confirmed"
                    );
                    return Ok(payment);
                }
                Err(AttemptError::Infra(error)) => {
                    // Our own bookkeeping failed; never keep paying.
                    return Err(error);
                }
                Err(AttemptError::Gateway(error)) => {
                    let category = categorize_gateway_error(&error);
                    self.publisher.payment_attempt(
                        current.id,
                        &current.user_id,
                        attempt,
                        false,
                        Some(category),
                    );

                    match severity(category, attempt) {
                        ErrorSeverity::Low => debug!(
                            operation_id = %current.id, attempt, %category, %error,
                            "payment attempt failed"
                        ),
                        ErrorSeverity::Medium => warn!(
                            operation_id = %current.id, attempt, %category, %error,
                            "payment attempt failed"
                        ),
                        _ => error!(
                            operation_id = %current.id, attempt, %category, %error,
                            "payment attempt failed"
                        ),
                    }

                    if error.is_fatal() {
                        return Err(ExitFeeError::PaymentFailed(error.to_string()));
                    }

                    if !self.retry_policy.should_retry(category, attempt) {
                        if attempt >= max_retries {
                            return Err(ExitFeeError::MaxRetriesExceeded);
                        }
                        return Err(ExitFeeError::PaymentFailed(error.to_string()));
                    }

                    let delay = self.retry_policy.retry_delay(category, attempt);
                    debug!(
                        operation_id = %current.id,
                        delay_ms = delay.as_millis() as u64,
                        "waiting before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(ExitFeeError::MaxRetriesExceeded)
    }

    /// One payment attempt. Each step is persisted before the next external
    /// call: invoice → `invoice_created`, then `payment_sent` immediately
    /// before payment execution, then verified receipt → `payment_confirmed`.
    async fn attempt_payment(
        &self,
        operation: &mut ExitFeeOperation,
        attempt: u32,
    ) -> std::result::Result<PaymentResult, AttemptError> {
        let invoice_started = Instant::now();
        let memo = format!("Exit fee - {} team", operation.operation_type());
        let invoice = self
            .gateway
            .create_invoice(operation.amount, &memo)
            .await
            .map_err(AttemptError::Gateway)?;

        self.machine
            .apply(
                operation,
                ExitFeeEvent::CreateInvoice {
                    invoice_text: invoice.payment_request.clone(),
                },
                invoice_started.elapsed(),
            )
            .await?;
        operation.status = ExitFeeStatus::InvoiceCreated;
        operation.invoice_text = Some(invoice.payment_request);

        self.store
            .update_retry_count(operation.id, attempt as i32)
            .await
            .map_err(|e| AttemptError::Infra(e.into()))?;
        operation.retry_count = attempt as i32;

        // Recorded before the call so a crash mid-payment is observable as
        // "sent but not confirmed" rather than silently lost.
        self.machine
            .apply(operation, ExitFeeEvent::SendPayment, Duration::ZERO)
            .await?;
        operation.status = ExitFeeStatus::PaymentSent;

        let payment_started = Instant::now();
        let payment = self
            .gateway
            .pay_invoice(operation.amount, "Exit fee payment")
            .await
            .map_err(AttemptError::Gateway)?;

        let verified = self
            .gateway
            .verify_receipt(&payment.payment_hash)
            .await
            .map_err(AttemptError::Gateway)?;
        if !verified {
            return Err(AttemptError::Gateway(GatewayError::PaymentRejected(
                "payment not confirmed by platform address".to_string(),
            )));
        }

        self.machine
            .apply(
                operation,
                ExitFeeEvent::ConfirmPayment {
                    payment_hash: payment.payment_hash.clone(),
                },
                payment_started.elapsed(),
            )
            .await?;
        operation.status = ExitFeeStatus::PaymentConfirmed;
        operation.payment_hash = Some(payment.payment_hash.clone());

        Ok(payment)
    }

    /// Execute the team mutation half of the saga. Only valid once payment
    /// has been independently confirmed.
    #[instrument(skip(self))]
    pub async fn execute_team_changes(&self, operation_id: Uuid) -> Result<()> {
        let operation = self.store.get_operation(operation_id).await?;
        self.execute_team_changes_inner(operation, None).await
    }

    /// `failure_prefix` lets the resume path record "Resume failed: <reason>"
    /// while sharing the whole walk.
    async fn execute_team_changes_inner(
        &self,
        operation: ExitFeeOperation,
        failure_prefix: Option<&str>,
    ) -> Result<()> {
        if operation.status != ExitFeeStatus::PaymentConfirmed {
            return Err(ExitFeeError::InvalidOperation);
        }

        let switch_record = self
            .store
            .insert_team_switch(NewTeamSwitchOperation {
                user_id: operation.user_id.clone(),
                from_team_id: operation.from_team_id.clone(),
                to_team_id: operation.to_team_id.clone(),
                exit_fee_payment_id: operation.id,
                operation_type: operation.operation_type(),
            })
            .await?;
        self.store
            .update_team_switch_status(switch_record.id, TeamSwitchStatus::Processing, None)
            .await?;

        let started = Instant::now();
        match self.run_team_mutation(&operation).await {
            Ok(()) => {
                self.store
                    .update_team_switch_status(switch_record.id, TeamSwitchStatus::Completed, None)
                    .await?;
                self.machine
                    .apply(
                        &operation,
                        ExitFeeEvent::CompleteTeamChange,
                        started.elapsed(),
                    )
                    .await?;
                self.publisher.team_switch(
                    operation.id,
                    &operation.user_id,
                    operation.from_team_id.as_deref(),
                    operation.to_team_id.as_deref(),
                    started.elapsed(),
                    true,
                );
                self.guard.release(&operation.user_id);

                info!(
                    operation_id = %operation.id,
                    user_id = %operation.user_id,
                    operation_type = %operation.operation_type(),
                    "team change complete"
                );
                Ok(())
            }
            Err(error) => {
                let reason = match failure_prefix {
                    Some(prefix) => format!("{prefix}{error}"),
                    None => error.to_string(),
                };

                if let Err(audit_error) = self
                    .store
                    .update_team_switch_status(
                        switch_record.id,
                        TeamSwitchStatus::Failed,
                        Some(&reason),
                    )
                    .await
                {
                    warn!(
                        operation_id = %operation.id,
                        error = %audit_error,
                        "failed to record team switch failure"
                    );
                }
                if let Err(apply_error) = self
                    .machine
                    .apply(
                        &operation,
                        ExitFeeEvent::Fail {
                            reason: reason.clone(),
                        },
                        started.elapsed(),
                    )
                    .await
                {
                    error!(
                        operation_id = %operation.id,
                        error = %apply_error,
                        "failed to persist failure transition"
                    );
                }
                self.publisher.team_switch(
                    operation.id,
                    &operation.user_id,
                    operation.from_team_id.as_deref(),
                    operation.to_team_id.as_deref(),
                    started.elapsed(),
                    false,
                );
                self.guard.release(&operation.user_id);

                Err(error)
            }
        }
    }

    async fn run_team_mutation(&self, operation: &ExitFeeOperation) -> Result<()> {
        match operation.operation_type() {
            OperationType::Leave => {
                let from = operation
                    .from_team_id
                    .as_deref()
                    .ok_or(ExitFeeError::InvalidOperation)?;
                self.teams
                    .execute_leave(&operation.user_id, from, operation.id)
                    .await
                    .map_err(|e| ExitFeeError::TeamChangesFailed(e.to_string()))
            }
            OperationType::Switch => {
                let (from, to) = match (&operation.from_team_id, &operation.to_team_id) {
                    (Some(from), Some(to)) => (from.as_str(), to.as_str()),
                    _ => return Err(ExitFeeError::InvalidOperation),
                };
                self.teams
                    .execute_switch(&operation.user_id, from, to, operation.id)
                    .await
                    .map_err(|e| ExitFeeError::TeamChangesFailed(e.to_string()))
            }
        }
    }

    /// Cancel an operation before any funds have moved. Refused once a
    /// payment may be in flight.
    #[instrument(skip(self))]
    pub async fn cancel_operation(&self, operation_id: Uuid) -> Result<()> {
        let operation = self.store.get_operation(operation_id).await?;

        if !operation.status.is_cancellable() {
            return Err(ExitFeeError::InvalidOperation);
        }

        self.machine
            .apply(
                &operation,
                ExitFeeEvent::Fail {
                    reason: "Cancelled by user".to_string(),
                },
                Duration::ZERO,
            )
            .await?;
        self.guard.release(&operation.user_id);

        info!(operation_id = %operation_id, user_id = %operation.user_id, "operation cancelled");
        Ok(())
    }

    /// Startup scan: rebuild the admission guard, re-drive operations that
    /// paid but never mutated, and re-verify operations that crashed
    /// mid-payment. Re-verification never re-pays.
    #[instrument(skip(self))]
    pub async fn resume_incomplete_operations(&self) -> Result<ResumeReport> {
        let mut report = ResumeReport::default();

        for operation in self.store.list_active().await? {
            if self.guard.admit(&operation.user_id) {
                report.guard_entries_rebuilt += 1;
            }
        }

        let confirmed = self
            .store
            .list_by_status(ExitFeeStatus::PaymentConfirmed)
            .await?;
        let outcomes = join_all(
            confirmed
                .into_iter()
                .map(|operation| self.resume_confirmed(operation)),
        )
        .await;
        for resumed in outcomes {
            if resumed {
                report.resumed += 1;
            } else {
                report.failed += 1;
            }
        }

        let sent = self.store.list_by_status(ExitFeeStatus::PaymentSent).await?;
        for operation in sent {
            self.resume_sent(operation, &mut report).await;
        }

        info!(
            resumed = report.resumed,
            reverified = report.reverified,
            failed = report.failed,
            awaiting_reconciliation = report.awaiting_reconciliation,
            "resumption scan complete"
        );
        Ok(report)
    }

    async fn resume_confirmed(&self, operation: ExitFeeOperation) -> bool {
        let operation_id = operation.id;
        info!(%operation_id, "resuming paid operation");

        match self
            .execute_team_changes_inner(operation, Some("Resume failed: "))
            .await
        {
            Ok(()) => true,
            Err(error) => {
                error!(%operation_id, %error, "resume failed; compensation may be required");
                false
            }
        }
    }

    async fn resume_sent(&self, operation: ExitFeeOperation, report: &mut ResumeReport) {
        let Some(payment_hash) = operation.payment_hash.clone() else {
            // Crash before the gateway acknowledged the payment; nothing to
            // verify against. Left for reconciliation or the staleness sweep.
            warn!(
                operation_id = %operation.id,
                "payment outcome unknown, awaiting reconciliation"
            );
            report.awaiting_reconciliation += 1;
            return;
        };

        match self.gateway.verify_receipt(&payment_hash).await {
            Ok(true) => {
                let applied = self
                    .machine
                    .apply(
                        &operation,
                        ExitFeeEvent::ConfirmPayment {
                            payment_hash: payment_hash.clone(),
                        },
                        Duration::ZERO,
                    )
                    .await;
                if let Err(error) = applied {
                    error!(operation_id = %operation.id, %error, "failed to record re-verified payment");
                    report.failed += 1;
                    return;
                }
                report.reverified += 1;

                let mut confirmed = operation;
                confirmed.status = ExitFeeStatus::PaymentConfirmed;
                confirmed.payment_hash = Some(payment_hash);
                if self.resume_confirmed(confirmed).await {
                    report.resumed += 1;
                } else {
                    report.failed += 1;
                }
            }
            Ok(false) => {
                let applied = self
                    .machine
                    .apply(
                        &operation,
                        ExitFeeEvent::Fail {
                            reason: "Resume failed: payment not received by platform"
                                .to_string(),
                        },
                        Duration::ZERO,
                    )
                    .await;
                match applied {
                    Ok(_) => {
                        self.guard.release(&operation.user_id);
                        report.failed += 1;
                    }
                    Err(error) => {
                        error!(operation_id = %operation.id, %error, "failed to fail unverified operation");
                    }
                }
            }
            Err(error) => {
                // Verification itself is down; leave the record untouched
                // for the next scan rather than guessing.
                warn!(operation_id = %operation.id, %error, "payment re-verification unavailable");
                report.awaiting_reconciliation += 1;
            }
        }
    }

    /// Expire operations that aged past the configured timeout without a
    /// confirmed payment.
    #[instrument(skip(self))]
    pub async fn expire_stale_operations(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::hours(self.config.operation_timeout_hours);
        let stale = self.store.list_stale(cutoff).await?;
        let mut expired = 0;

        for operation in stale {
            match self
                .machine
                .apply(&operation, ExitFeeEvent::Expire, Duration::ZERO)
                .await
            {
                Ok(_) => {
                    self.guard.release(&operation.user_id);
                    warn!(
                        operation_id = %operation.id,
                        user_id = %operation.user_id,
                        created_at = %operation.created_at,
                        "expired stale operation"
                    );
                    expired += 1;
                }
                Err(error) => {
                    error!(operation_id = %operation.id, %error, "failed to expire operation");
                }
            }
        }

        Ok(expired)
    }

    /// Operator surface: mark a paid-but-unmutated operation as resolved
    /// out of band (refund or manual team fix). Rolls back the linked audit
    /// record.
    #[instrument(skip(self))]
    pub async fn mark_compensated(&self, operation_id: Uuid) -> Result<()> {
        let operation = self.store.get_operation(operation_id).await?;

        let eligible = matches!(
            operation.status,
            ExitFeeStatus::PaymentConfirmed | ExitFeeStatus::Failed
        ) && operation.is_paid();
        if !eligible {
            return Err(ExitFeeError::InvalidOperation);
        }

        self.machine
            .apply(&operation, ExitFeeEvent::Compensate, Duration::ZERO)
            .await?;

        if let Some(switch_record) = self
            .store
            .find_team_switch_for_payment(operation.id)
            .await?
        {
            if switch_record.status != TeamSwitchStatus::Completed {
                self.store
                    .update_team_switch_status(
                        switch_record.id,
                        TeamSwitchStatus::RolledBack,
                        None,
                    )
                    .await?;
            }
        }

        self.guard.release(&operation.user_id);
        info!(%operation_id, user_id = %operation.user_id, "operation compensated");
        Ok(())
    }

    /// Paid operations stuck in `failed`: the ones an operator must look
    /// at. Never silently dropped.
    pub async fn compensation_candidates(&self) -> Result<Vec<ExitFeeOperation>> {
        Ok(self
            .store
            .list_by_status(ExitFeeStatus::Failed)
            .await?
            .into_iter()
            .filter(ExitFeeOperation::is_paid)
            .collect())
    }

    /// Transition an operation to `failed` and release its user's slot.
    /// Best-effort: the caller's error is what gets surfaced.
    async fn fail_operation(&self, operation_id: Uuid, reason: &str) {
        match self.store.get_operation(operation_id).await {
            Ok(operation) => {
                if !operation.status.is_terminal() {
                    if let Err(error) = self
                        .machine
                        .apply(
                            &operation,
                            ExitFeeEvent::Fail {
                                reason: reason.to_string(),
                            },
                            Duration::ZERO,
                        )
                        .await
                    {
                        error!(%operation_id, %error, "failed to persist failure transition");
                    }
                }
                self.guard.release(&operation.user_id);
            }
            Err(error) => {
                error!(%operation_id, %error, "failed to load operation for failure transition");
            }
        }
    }
}

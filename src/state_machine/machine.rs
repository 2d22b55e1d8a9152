//! Transition driver for exit fee operations.
//!
//! The transition graph is forward-only: retries loop back through
//! `invoice_created` (a fresh invoice per attempt), failure states are
//! reachable from any non-terminal state, and the single sanctioned exit
//! from `failed` is the administrative compensation of a paid operation.
//! Every transition is persisted before anything else happens, so a crash
//! between any two awaited calls leaves a record whose `payment_status`
//! alone is enough to resume correctly.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::errors::{StateMachineError, StateMachineResult};
use super::events::ExitFeeEvent;
use super::states::ExitFeeStatus;
use crate::events::EventPublisher;
use crate::models::ExitFeeOperation;
use crate::store::{OperationStore, StatusUpdate};

/// Resolve the target state for an event, or reject the transition.
pub fn next_status(
    current: ExitFeeStatus,
    event: &ExitFeeEvent,
) -> StateMachineResult<ExitFeeStatus> {
    use ExitFeeEvent as E;
    use ExitFeeStatus as S;

    let target = match (current, event) {
        // Invoice issuance, including the fresh-invoice retry edges
        (S::Initiated, E::CreateInvoice { .. }) => S::InvoiceCreated,
        (S::InvoiceCreated, E::CreateInvoice { .. }) => S::InvoiceCreated,
        (S::PaymentSent, E::CreateInvoice { .. }) => S::InvoiceCreated,

        // Payment execution and independent confirmation
        (S::InvoiceCreated, E::SendPayment) => S::PaymentSent,
        (S::PaymentSent, E::ConfirmPayment { .. }) => S::PaymentConfirmed,

        // The commit point
        (S::PaymentConfirmed, E::CompleteTeamChange) => S::TeamChangeComplete,

        // Failure from any non-terminal state
        (from, E::Fail { .. }) if !from.is_terminal() => S::Failed,

        // Staleness, only before payment was confirmed
        (from, E::Expire) if from.is_expirable() => S::Expired,

        // Operator remediation for paid-but-unmutated operations
        (S::PaymentConfirmed, E::Compensate) => S::Compensated,
        (S::Failed, E::Compensate) => S::Compensated,

        (from, event) => {
            return Err(StateMachineError::InvalidTransition {
                from,
                event: event.name(),
            })
        }
    };

    Ok(target)
}

/// Persists transitions through the operation store and publishes a typed
/// transition event after each successful write.
pub struct OperationStateMachine {
    store: Arc<dyn OperationStore>,
    publisher: EventPublisher,
}

impl OperationStateMachine {
    pub fn new(store: Arc<dyn OperationStore>, publisher: EventPublisher) -> Self {
        Self { store, publisher }
    }

    /// Apply an event to an operation: validate the edge, persist the
    /// resulting state, then publish the transition. `step_duration` is how
    /// long the work leading up to this transition took; it rides along on
    /// the published event for monitoring.
    pub async fn apply(
        &self,
        operation: &ExitFeeOperation,
        event: ExitFeeEvent,
        step_duration: Duration,
    ) -> StateMachineResult<ExitFeeStatus> {
        let from = operation.status;
        let to = next_status(from, &event)?;

        match &event {
            ExitFeeEvent::CreateInvoice { invoice_text } => {
                self.store
                    .update_invoice(operation.id, invoice_text)
                    .await?;
            }
            ExitFeeEvent::ConfirmPayment { payment_hash } => {
                self.store
                    .update_status(
                        operation.id,
                        to,
                        StatusUpdate::new().payment_hash(payment_hash),
                    )
                    .await?;
            }
            ExitFeeEvent::Fail { reason } => {
                self.store
                    .update_status(operation.id, to, StatusUpdate::new().error_message(reason))
                    .await?;
            }
            _ => {
                self.store
                    .update_status(operation.id, to, StatusUpdate::new())
                    .await?;
            }
        }

        debug!(
            operation_id = %operation.id,
            user_id = %operation.user_id,
            from = %from,
            to = %to,
            event = event.name(),
            "exit fee transition"
        );

        self.publisher.state_transition(
            operation.id,
            &operation.user_id,
            from,
            to,
            step_duration,
        );

        Ok(to)
    }
}

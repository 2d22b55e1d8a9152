//! Retry bounds, crash recovery, staleness expiry, and the compensation
//! surface.

mod common;

use common::{
    build_orchestrator, restart_orchestrator, FakePaymentGateway, FakeTeamService,
};
use exitfee_core::config::ExitFeeConfig;
use exitfee_core::error::ExitFeeError;
use exitfee_core::gateway::{GatewayError, TeamError};
use exitfee_core::orchestration::ExitFeeOrchestrator;
use exitfee_core::state_machine::{ExitFeeStatus, TeamSwitchStatus};
use exitfee_core::store::{OperationStore, StatusUpdate};
use std::sync::Arc;

#[tokio::test]
async fn test_bounded_retries_with_fresh_invoice_per_attempt() {
    let gateway = FakePaymentGateway::succeeding();
    gateway.fail_payments(GatewayError::Network("connection reset".to_string()), 5);
    let teams = FakeTeamService::new();
    let (store, orchestrator) = build_orchestrator(gateway.clone(), teams);

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
    let result = orchestrator.process_exit_fee_payment(operation.id).await;

    assert!(matches!(result, Err(ExitFeeError::MaxRetriesExceeded)));
    assert_eq!(gateway.pay_attempts(), 3);

    // Every attempt issued a brand-new invoice.
    let invoices = gateway.invoices_issued();
    assert_eq!(invoices.len(), 3);
    assert_eq!(
        invoices.iter().collect::<std::collections::HashSet<_>>().len(),
        3
    );

    let failed = store.get_operation(operation.id).await.unwrap();
    assert_eq!(failed.status, ExitFeeStatus::Failed);
    assert_eq!(failed.retry_count, 3);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("maximum payment retries exceeded")
    );

    // The stored invoice is the last one issued.
    assert_eq!(failed.invoice_text.as_deref(), Some(invoices[2].as_str()));
}

#[tokio::test]
async fn test_transient_network_failure_then_success() {
    let gateway = FakePaymentGateway::succeeding();
    gateway.fail_next_payment(GatewayError::Network("timeout mid-handshake".to_string()));
    let teams = FakeTeamService::new();
    let (store, orchestrator) = build_orchestrator(gateway.clone(), teams);

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
    orchestrator
        .process_exit_fee_payment(operation.id)
        .await
        .unwrap();

    let paid = store.get_operation(operation.id).await.unwrap();
    assert_eq!(paid.status, ExitFeeStatus::PaymentConfirmed);
    assert_eq!(paid.retry_count, 2);
    assert_eq!(gateway.invoices_issued().len(), 2);

    orchestrator.execute_team_changes(operation.id).await.unwrap();
    let complete = store.get_operation(operation.id).await.unwrap();
    assert_eq!(complete.status, ExitFeeStatus::TeamChangeComplete);
}

#[tokio::test]
async fn test_insufficient_funds_aborts_without_retry() {
    let gateway = FakePaymentGateway::succeeding();
    gateway.fail_payments(GatewayError::InsufficientBalance, 3);
    let teams = FakeTeamService::new();
    let (store, orchestrator) = build_orchestrator(gateway.clone(), teams);

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
    let result = orchestrator.process_exit_fee_payment(operation.id).await;

    assert!(matches!(result, Err(ExitFeeError::PaymentFailed(_))));
    assert_eq!(gateway.pay_attempts(), 1);

    let failed = store.get_operation(operation.id).await.unwrap();
    assert_eq!(failed.status, ExitFeeStatus::Failed);
}

#[tokio::test]
async fn test_authentication_failure_aborts_immediately() {
    let gateway = FakePaymentGateway::succeeding();
    gateway.fail_payments(GatewayError::NotAuthenticated, 3);
    let teams = FakeTeamService::new();
    let (store, orchestrator) = build_orchestrator(gateway.clone(), teams);

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
    let result = orchestrator.process_exit_fee_payment(operation.id).await;

    assert!(matches!(result, Err(ExitFeeError::PaymentFailed(_))));
    assert_eq!(gateway.pay_attempts(), 1);
    assert_eq!(
        store.get_operation(operation.id).await.unwrap().status,
        ExitFeeStatus::Failed
    );
}

#[tokio::test]
async fn test_unverified_payment_never_advances_saga() {
    let gateway = FakePaymentGateway::succeeding();
    gateway.set_verify_result(false);
    let teams = FakeTeamService::new();
    let (store, orchestrator) = build_orchestrator(gateway.clone(), teams.clone());

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
    let result = orchestrator.process_exit_fee_payment(operation.id).await;
    assert!(matches!(result, Err(ExitFeeError::PaymentFailed(_))));

    let failed = store.get_operation(operation.id).await.unwrap();
    assert_eq!(failed.status, ExitFeeStatus::Failed);
    // The apparent payment success was never trusted: no confirmed hash,
    // no team mutation.
    assert!(failed.payment_hash.is_none());
    assert!(teams.leave_calls().is_empty());
    assert!(gateway.verify_calls() >= 1);
}

#[tokio::test]
async fn test_resume_drives_paid_operation_to_completion() {
    let gateway = FakePaymentGateway::succeeding();
    let teams = FakeTeamService::new();
    let (store, orchestrator) = build_orchestrator(gateway.clone(), teams.clone());

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
    orchestrator
        .process_exit_fee_payment(operation.id)
        .await
        .unwrap();
    // Crash here: payment confirmed, team mutation never attempted.
    drop(orchestrator);

    let restarted = restart_orchestrator(store.clone(), gateway, teams.clone());
    let report = restarted.resume_incomplete_operations().await.unwrap();

    assert_eq!(report.resumed, 1);
    assert_eq!(report.failed, 0);

    let complete = store.get_operation(operation.id).await.unwrap();
    assert_eq!(complete.status, ExitFeeStatus::TeamChangeComplete);
    assert!(complete.completed_at.is_some());

    // The mutation ran exactly once, keyed by the operation id.
    let leaves = teams.leave_calls();
    assert_eq!(leaves.len(), 1);
    assert_eq!(leaves[0].2, operation.id);
}

#[tokio::test]
async fn test_resume_failure_marks_operation_with_reason() {
    let gateway = FakePaymentGateway::succeeding();
    let teams = FakeTeamService::new();
    let (store, orchestrator) = build_orchestrator(gateway.clone(), teams.clone());

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
    orchestrator
        .process_exit_fee_payment(operation.id)
        .await
        .unwrap();
    drop(orchestrator);

    teams.fail_mutations(TeamError::Storage("membership table offline".to_string()));
    let restarted = restart_orchestrator(store.clone(), gateway, teams);
    let report = restarted.resume_incomplete_operations().await.unwrap();

    assert_eq!(report.resumed, 0);
    assert_eq!(report.failed, 1);

    let failed = store.get_operation(operation.id).await.unwrap();
    assert_eq!(failed.status, ExitFeeStatus::Failed);
    let message = failed.error_message.unwrap();
    assert!(
        message.starts_with("Resume failed: "),
        "unexpected message: {message}"
    );
    // Paid but unmutated: surfaced for compensation.
    assert!(failed.payment_hash.is_some());
    let candidates = restarted.compensation_candidates().await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].id, operation.id);
}

#[tokio::test]
async fn test_resume_reverifies_payment_sent_with_hash() {
    let gateway = FakePaymentGateway::succeeding();
    let teams = FakeTeamService::new();
    let (store, orchestrator) = build_orchestrator(gateway.clone(), teams.clone());

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
    drop(orchestrator);

    // Simulate a crash after the gateway acknowledged the payment but
    // before the confirmation transition was recorded.
    store
        .update_status(
            operation.id,
            ExitFeeStatus::PaymentSent,
            StatusUpdate::new().payment_hash("hash-interrupted"),
        )
        .await
        .unwrap();

    let restarted = restart_orchestrator(store.clone(), gateway.clone(), teams);
    let report = restarted.resume_incomplete_operations().await.unwrap();

    assert_eq!(report.reverified, 1);
    assert_eq!(report.resumed, 1);
    assert!(gateway.verify_calls() >= 1);
    // Verified, never re-paid.
    assert_eq!(gateway.pay_attempts(), 0);

    let complete = store.get_operation(operation.id).await.unwrap();
    assert_eq!(complete.status, ExitFeeStatus::TeamChangeComplete);
}

#[tokio::test]
async fn test_resume_fails_payment_sent_when_receipt_absent() {
    let gateway = FakePaymentGateway::succeeding();
    gateway.set_verify_result(false);
    let teams = FakeTeamService::new();
    let (store, orchestrator) = build_orchestrator(gateway.clone(), teams.clone());

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
    drop(orchestrator);

    store
        .update_status(
            operation.id,
            ExitFeeStatus::PaymentSent,
            StatusUpdate::new().payment_hash("hash-unpaid"),
        )
        .await
        .unwrap();

    let restarted = restart_orchestrator(store.clone(), gateway, teams);
    let report = restarted.resume_incomplete_operations().await.unwrap();

    assert_eq!(report.failed, 1);
    let failed = store.get_operation(operation.id).await.unwrap();
    assert_eq!(failed.status, ExitFeeStatus::Failed);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("Resume failed: payment not received by platform")
    );

    // Slot released: the user can try again.
    restarted
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_resume_defers_when_reverification_unavailable() {
    let gateway = FakePaymentGateway::succeeding();
    gateway.fail_verification(GatewayError::Network("ledger unreachable".to_string()));
    let teams = FakeTeamService::new();
    let (store, orchestrator) = build_orchestrator(gateway.clone(), teams.clone());

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
    drop(orchestrator);

    store
        .update_status(
            operation.id,
            ExitFeeStatus::PaymentSent,
            StatusUpdate::new().payment_hash("hash-pending"),
        )
        .await
        .unwrap();

    let restarted = restart_orchestrator(store.clone(), gateway, teams);
    let report = restarted.resume_incomplete_operations().await.unwrap();

    // Verification itself was down: the operation is left untouched for
    // the next scan rather than guessed at.
    assert_eq!(report.awaiting_reconciliation, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(
        store.get_operation(operation.id).await.unwrap().status,
        ExitFeeStatus::PaymentSent
    );
}

#[tokio::test]
async fn test_resume_leaves_hashless_payment_sent_for_reconciliation() {
    let gateway = FakePaymentGateway::succeeding();
    let teams = FakeTeamService::new();
    let (store, orchestrator) = build_orchestrator(gateway.clone(), teams.clone());

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
    drop(orchestrator);

    // Crash before the gateway acknowledged anything: no hash to verify.
    store
        .update_status(operation.id, ExitFeeStatus::PaymentSent, StatusUpdate::new())
        .await
        .unwrap();

    let restarted = restart_orchestrator(store.clone(), gateway.clone(), teams);
    let report = restarted.resume_incomplete_operations().await.unwrap();

    assert_eq!(report.awaiting_reconciliation, 1);
    assert_eq!(gateway.verify_calls(), 0);
    assert_eq!(
        store.get_operation(operation.id).await.unwrap().status,
        ExitFeeStatus::PaymentSent
    );

    // Still admitted: the guard was rebuilt from the store, so a duplicate
    // initiate is refused while reconciliation is pending.
    let result = restarted.initiate_team_leave("u1", "team-a").await;
    assert!(matches!(result, Err(ExitFeeError::OperationInProgress)));
}

#[tokio::test]
async fn test_stale_unpaid_operations_expire() {
    let gateway = FakePaymentGateway::succeeding();
    let teams = FakeTeamService::new();
    let store = Arc::new(exitfee_core::store::InMemoryOperationStore::new());
    // Zero-hour timeout: everything unpaid is immediately stale.
    let config = ExitFeeConfig {
        operation_timeout_hours: 0,
        retry: common::fast_retry_config(),
        ..ExitFeeConfig::default()
    };
    let orchestrator =
        ExitFeeOrchestrator::new(store.clone(), gateway.clone(), teams, config);

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();

    let expired = orchestrator.expire_stale_operations().await.unwrap();
    assert_eq!(expired, 1);
    assert_eq!(
        store.get_operation(operation.id).await.unwrap().status,
        ExitFeeStatus::Expired
    );

    // Guard released by expiry.
    orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_expiry_never_touches_confirmed_payments() {
    let gateway = FakePaymentGateway::succeeding();
    let teams = FakeTeamService::new();
    let store = Arc::new(exitfee_core::store::InMemoryOperationStore::new());
    let config = ExitFeeConfig {
        operation_timeout_hours: 0,
        retry: common::fast_retry_config(),
        ..ExitFeeConfig::default()
    };
    let orchestrator =
        ExitFeeOrchestrator::new(store.clone(), gateway, teams, config);

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
    orchestrator
        .process_exit_fee_payment(operation.id)
        .await
        .unwrap();

    let expired = orchestrator.expire_stale_operations().await.unwrap();
    assert_eq!(expired, 0);
    assert_eq!(
        store.get_operation(operation.id).await.unwrap().status,
        ExitFeeStatus::PaymentConfirmed
    );
}

#[tokio::test]
async fn test_compensation_resolves_paid_but_stuck_operation() {
    let gateway = FakePaymentGateway::succeeding();
    let teams = FakeTeamService::new();
    let (store, orchestrator) = build_orchestrator(gateway, teams.clone());

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
    orchestrator
        .process_exit_fee_payment(operation.id)
        .await
        .unwrap();

    teams.fail_mutations(TeamError::NotOnTeam {
        user_id: "u1".to_string(),
        team_id: "team-a".to_string(),
    });
    let result = orchestrator.execute_team_changes(operation.id).await;
    assert!(matches!(result, Err(ExitFeeError::TeamChangesFailed(_))));

    let candidates = orchestrator.compensation_candidates().await.unwrap();
    assert_eq!(candidates.len(), 1);

    orchestrator.mark_compensated(operation.id).await.unwrap();

    let compensated = store.get_operation(operation.id).await.unwrap();
    assert_eq!(compensated.status, ExitFeeStatus::Compensated);

    let switch_record = store
        .find_team_switch_for_payment(operation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(switch_record.status, TeamSwitchStatus::RolledBack);

    // Guard released; the user can move on.
    orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_compensation_rejected_for_unpaid_failures() {
    let gateway = FakePaymentGateway::succeeding();
    gateway.fail_payments(GatewayError::Network("down".to_string()), 5);
    let teams = FakeTeamService::new();
    let (store, orchestrator) = build_orchestrator(gateway, teams);

    let operation = orchestrator
        .initiate_team_leave("u1", "team-a")
        .await
        .unwrap();
    let _ = orchestrator.process_exit_fee_payment(operation.id).await;
    assert_eq!(
        store.get_operation(operation.id).await.unwrap().status,
        ExitFeeStatus::Failed
    );

    // Never paid, so there is nothing to compensate.
    let result = orchestrator.mark_compensated(operation.id).await;
    assert!(matches!(result, Err(ExitFeeError::InvalidOperation)));
    assert!(orchestrator
        .compensation_candidates()
        .await
        .unwrap()
        .is_empty());
}

//! Shared fixtures: scripted fakes for the payment gateway and the team
//! service, plus an orchestrator wired for fast test retries.

// Each test binary uses its own subset of these fixtures.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use exitfee_core::config::ExitFeeConfig;
use exitfee_core::gateway::{
    GatewayError, LightningInvoice, PaymentGateway, PaymentResult, Team, TeamError, TeamService,
};
use exitfee_core::orchestration::{ExitFeeOrchestrator, RetryConfig};
use exitfee_core::store::InMemoryOperationStore;

#[derive(Default)]
struct GatewayState {
    /// Outcome consumed per `pay_invoice` call; empty queue means success.
    pay_outcomes: VecDeque<Result<(), GatewayError>>,
    /// Outcome consumed per `create_invoice` call; empty queue means success.
    invoice_outcomes: VecDeque<Result<(), GatewayError>>,
    verify_result: bool,
    verify_error: Option<GatewayError>,
    invoices_issued: Vec<String>,
    pay_count: u32,
    verify_count: u32,
}

/// Payment gateway whose per-attempt outcomes are scripted by the test.
pub struct FakePaymentGateway {
    state: Mutex<GatewayState>,
}

impl FakePaymentGateway {
    /// Every call succeeds and every payment verifies.
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GatewayState {
                verify_result: true,
                ..GatewayState::default()
            }),
        })
    }

    /// Queue a failure for the next `pay_invoice` call; queued failures are
    /// consumed in order, after which payments succeed.
    pub fn fail_next_payment(&self, error: GatewayError) {
        self.state.lock().pay_outcomes.push_back(Err(error));
    }

    pub fn fail_payments(&self, error: GatewayError, times: usize) {
        let mut state = self.state.lock();
        for _ in 0..times {
            state.pay_outcomes.push_back(Err(error.clone()));
        }
    }

    pub fn set_verify_result(&self, verified: bool) {
        self.state.lock().verify_result = verified;
    }

    pub fn fail_verification(&self, error: GatewayError) {
        self.state.lock().verify_error = Some(error);
    }

    pub fn invoices_issued(&self) -> Vec<String> {
        self.state.lock().invoices_issued.clone()
    }

    pub fn pay_attempts(&self) -> u32 {
        self.state.lock().pay_count
    }

    pub fn verify_calls(&self) -> u32 {
        self.state.lock().verify_count
    }
}

#[async_trait]
impl PaymentGateway for FakePaymentGateway {
    async fn create_invoice(
        &self,
        amount_sats: i64,
        _memo: &str,
    ) -> Result<LightningInvoice, GatewayError> {
        let mut state = self.state.lock();
        if let Some(outcome) = state.invoice_outcomes.pop_front() {
            outcome?;
        }
        let payment_request = format!("lnbc-test-invoice-{}", state.invoices_issued.len() + 1);
        state.invoices_issued.push(payment_request.clone());
        Ok(LightningInvoice {
            payment_request,
            amount_sats,
        })
    }

    async fn pay_invoice(
        &self,
        amount_sats: i64,
        _memo: &str,
    ) -> Result<PaymentResult, GatewayError> {
        let mut state = self.state.lock();
        state.pay_count += 1;
        if let Some(outcome) = state.pay_outcomes.pop_front() {
            outcome?;
        }
        Ok(PaymentResult {
            payment_hash: format!("hash-{}", state.pay_count),
            amount_sats,
        })
    }

    async fn verify_receipt(&self, _payment_hash: &str) -> Result<bool, GatewayError> {
        let mut state = self.state.lock();
        state.verify_count += 1;
        if let Some(error) = state.verify_error.clone() {
            return Err(error);
        }
        Ok(state.verify_result)
    }
}

#[derive(Default)]
struct TeamServiceState {
    teams: HashMap<String, Team>,
    mutation_error: Option<TeamError>,
    leave_calls: Vec<(String, String, Uuid)>,
    switch_calls: Vec<(String, String, String, Uuid)>,
}

/// Team service with scripted teams and an optional persistent mutation
/// failure.
#[derive(Default)]
pub struct FakeTeamService {
    state: Mutex<TeamServiceState>,
}

impl FakeTeamService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_team(self: Arc<Self>, id: &str, member_count: u32, max_members: u32) -> Arc<Self> {
        self.state.lock().teams.insert(
            id.to_string(),
            Team {
                id: id.to_string(),
                member_count,
                max_members,
            },
        );
        self
    }

    pub fn fail_mutations(&self, error: TeamError) {
        self.state.lock().mutation_error = Some(error);
    }

    pub fn leave_calls(&self) -> Vec<(String, String, Uuid)> {
        self.state.lock().leave_calls.clone()
    }

    pub fn switch_calls(&self) -> Vec<(String, String, String, Uuid)> {
        self.state.lock().switch_calls.clone()
    }
}

#[async_trait]
impl TeamService for FakeTeamService {
    async fn get_team(&self, team_id: &str) -> Result<Option<Team>, TeamError> {
        Ok(self.state.lock().teams.get(team_id).cloned())
    }

    async fn execute_leave(
        &self,
        user_id: &str,
        team_id: &str,
        operation_id: Uuid,
    ) -> Result<(), TeamError> {
        let mut state = self.state.lock();
        if let Some(error) = state.mutation_error.clone() {
            return Err(error);
        }
        state
            .leave_calls
            .push((user_id.to_string(), team_id.to_string(), operation_id));
        Ok(())
    }

    async fn execute_switch(
        &self,
        user_id: &str,
        from_team_id: &str,
        to_team_id: &str,
        operation_id: Uuid,
    ) -> Result<(), TeamError> {
        let mut state = self.state.lock();
        if let Some(error) = state.mutation_error.clone() {
            return Err(error);
        }
        state.switch_calls.push((
            user_id.to_string(),
            from_team_id.to_string(),
            to_team_id.to_string(),
            operation_id,
        ));
        Ok(())
    }
}

/// Retry bounds identical in shape to production, with millisecond delays
/// so backoff paths run without slowing the suite down.
pub fn fast_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        backoff_multiplier: 2.0,
        jitter_factor: 0.2,
        max_delay: Duration::from_millis(50),
        network_base_delay: Duration::from_millis(2),
        payment_base_delay: Duration::from_millis(5),
        system_base_delay: Duration::from_millis(10),
        default_base_delay: Duration::from_millis(3),
    }
}

pub fn test_config() -> ExitFeeConfig {
    ExitFeeConfig {
        retry: fast_retry_config(),
        ..ExitFeeConfig::default()
    }
}

pub fn build_orchestrator(
    gateway: Arc<FakePaymentGateway>,
    teams: Arc<FakeTeamService>,
) -> (Arc<InMemoryOperationStore>, ExitFeeOrchestrator) {
    let store = Arc::new(InMemoryOperationStore::new());
    let orchestrator =
        ExitFeeOrchestrator::new(store.clone(), gateway, teams, test_config());
    (store, orchestrator)
}

/// A second orchestrator over the same store: a simulated process restart
/// (fresh guard, empty in-memory state, same durable records).
pub fn restart_orchestrator(
    store: Arc<InMemoryOperationStore>,
    gateway: Arc<FakePaymentGateway>,
    teams: Arc<FakeTeamService>,
) -> ExitFeeOrchestrator {
    ExitFeeOrchestrator::new(store, gateway, teams, test_config())
}

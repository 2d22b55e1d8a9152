//! External collaborator boundaries.
//!
//! The payment provider and the team membership service are consumed
//! through these traits and injected into the orchestrator, so production
//! wiring and test fakes are interchangeable. Neither is implemented here.
//!
//! The orchestrator never treats a `pay_invoice` success response as proof
//! of receipt; `verify_receipt` must independently confirm the platform
//! address recorded the payment before the saga advances.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A Lightning invoice issued for one payment attempt. Attempts never share
/// invoices; an invoice that failed to settle is abandoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightningInvoice {
    /// BOLT-11 payment request string.
    pub payment_request: String,
    pub amount_sats: i64,
}

/// Gateway acknowledgement of an executed payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResult {
    /// Key for idempotent receipt verification.
    pub payment_hash: String,
    pub amount_sats: i64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Session with the payment provider is gone; retrying cannot help
    /// until the caller re-authenticates.
    #[error("not authenticated with payment provider")]
    NotAuthenticated,

    #[error("insufficient wallet balance")]
    InsufficientBalance,

    #[error("network error: {0}")]
    Network(String),

    #[error("payment provider timed out: {0}")]
    Timeout(String),

    /// Routing or invoice trouble on the Lightning side.
    #[error("lightning network error: {0}")]
    Lightning(String),

    #[error("payment rejected: {0}")]
    PaymentRejected(String),

    #[error("payment provider error: {0}")]
    Provider(String),
}

impl GatewayError {
    /// Errors that abort the retry loop outright, regardless of how many
    /// attempts remain.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotAuthenticated)
    }
}

/// Lightning payment provider boundary: invoice creation, payment
/// execution, and independent receipt verification.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(
        &self,
        amount_sats: i64,
        memo: &str,
    ) -> Result<LightningInvoice, GatewayError>;

    /// Pay the platform's fixed receiving address.
    async fn pay_invoice(
        &self,
        amount_sats: i64,
        memo: &str,
    ) -> Result<PaymentResult, GatewayError>;

    /// Whether the platform address recorded a payment matching the hash.
    /// Safe to call repeatedly; the ledger query is read-only.
    async fn verify_receipt(&self, payment_hash: &str) -> Result<bool, GatewayError>;
}

/// Team read used for switch validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub member_count: u32,
    pub max_members: u32,
}

impl Team {
    pub fn has_capacity(&self) -> bool {
        self.member_count < self.max_members
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TeamError {
    #[error("team {0} not found")]
    TeamNotFound(String),

    #[error("team {0} is full")]
    TeamFull(String),

    #[error("user {user_id} is not on team {team_id}")]
    NotOnTeam { user_id: String, team_id: String },

    #[error("user {user_id} is already on team {team_id}")]
    AlreadyOnTeam { user_id: String, team_id: String },

    #[error("team storage error: {0}")]
    Storage(String),
}

/// Team membership boundary. Both mutations are idempotent with respect to
/// `operation_id`, so the resume path can safely re-invoke them.
#[async_trait]
pub trait TeamService: Send + Sync {
    async fn get_team(&self, team_id: &str) -> Result<Option<Team>, TeamError>;

    async fn execute_leave(
        &self,
        user_id: &str,
        team_id: &str,
        operation_id: Uuid,
    ) -> Result<(), TeamError>;

    async fn execute_switch(
        &self,
        user_id: &str,
        from_team_id: &str,
        to_team_id: &str,
        operation_id: Uuid,
    ) -> Result<(), TeamError>;
}

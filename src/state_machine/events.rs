use serde::{Deserialize, Serialize};

/// Events that drive an exit fee operation through its lifecycle.
///
/// Every event maps to at most one target state from a given current state;
/// the mapping lives in [`super::machine::next_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExitFeeEvent {
    /// A fresh invoice was obtained from the gateway. Re-issued on every
    /// payment attempt; stale invoices are abandoned, not reused.
    CreateInvoice { invoice_text: String },
    /// Payment execution is about to be handed to the gateway.
    SendPayment,
    /// The platform address independently confirmed receipt.
    ConfirmPayment { payment_hash: String },
    /// The team mutation reported success.
    CompleteTeamChange,
    /// Unrecoverable failure, including user cancellation.
    Fail { reason: String },
    /// Aged out before payment was confirmed.
    Expire,
    /// Operator resolved a paid-but-unmutated operation out of band.
    Compensate,
}

impl ExitFeeEvent {
    /// Short name used in logs and transition metadata.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateInvoice { .. } => "create_invoice",
            Self::SendPayment => "send_payment",
            Self::ConfirmPayment { .. } => "confirm_payment",
            Self::CompleteTeamChange => "complete_team_change",
            Self::Fail { .. } => "fail",
            Self::Expire => "expire",
            Self::Compensate => "compensate",
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exit fee operation states, persisted as the `payment_status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitFeeStatus {
    /// Record created, no invoice issued yet
    Initiated,
    /// A fresh invoice has been obtained and persisted
    InvoiceCreated,
    /// Payment execution has been handed to the gateway
    PaymentSent,
    /// The platform address independently confirmed receipt
    PaymentConfirmed,
    /// Team mutation succeeded; the saga's single commit point
    TeamChangeComplete,
    /// Operation failed; `error_message` carries the reason
    Failed,
    /// Paid but unmutated, resolved out of band by an operator
    Compensated,
    /// Abandoned before payment was confirmed
    Expired,
}

impl ExitFeeStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TeamChangeComplete | Self::Failed | Self::Expired | Self::Compensated
        )
    }

    /// Check if funds may already have moved in this state
    pub fn funds_in_flight(&self) -> bool {
        matches!(self, Self::PaymentSent | Self::PaymentConfirmed)
    }

    /// States from which the user may still cancel: nothing has been paid
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Initiated | Self::InvoiceCreated)
    }

    /// States eligible for the staleness sweep. Once payment is confirmed
    /// the operation must be resumed or compensated, never expired.
    pub fn is_expirable(&self) -> bool {
        matches!(
            self,
            Self::Initiated | Self::InvoiceCreated | Self::PaymentSent
        )
    }
}

impl fmt::Display for ExitFeeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiated => write!(f, "initiated"),
            Self::InvoiceCreated => write!(f, "invoice_created"),
            Self::PaymentSent => write!(f, "payment_sent"),
            Self::PaymentConfirmed => write!(f, "payment_confirmed"),
            Self::TeamChangeComplete => write!(f, "team_change_complete"),
            Self::Failed => write!(f, "failed"),
            Self::Compensated => write!(f, "compensated"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for ExitFeeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(Self::Initiated),
            "invoice_created" => Ok(Self::InvoiceCreated),
            "payment_sent" => Ok(Self::PaymentSent),
            "payment_confirmed" => Ok(Self::PaymentConfirmed),
            "team_change_complete" => Ok(Self::TeamChangeComplete),
            "failed" => Ok(Self::Failed),
            "compensated" => Ok(Self::Compensated),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Invalid exit fee status: {s}")),
        }
    }
}

impl Default for ExitFeeStatus {
    fn default() -> Self {
        Self::Initiated
    }
}

/// States of the subordinate team-switch audit record. Tracked separately
/// from the payment so payment success and mutation success are never
/// conflated into one flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamSwitchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    RolledBack,
}

impl TeamSwitchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }
}

impl fmt::Display for TeamSwitchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}

impl std::str::FromStr for TeamSwitchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "rolled_back" => Ok(Self::RolledBack),
            _ => Err(format!("Invalid team switch status: {s}")),
        }
    }
}

impl Default for TeamSwitchStatus {
    fn default() -> Self {
        Self::Pending
    }
}

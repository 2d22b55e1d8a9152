//! # Payment Error Classification
//!
//! Categorizes failures from the payment gateway, the team service, and the
//! saga itself, and decides what happens next: retry with backoff, abort
//! immediately, or surface to the user.
//!
//! The category, not the concrete error type, drives both decisions:
//! network trouble is retried more aggressively and sooner than payment or
//! lightning failures, and an unclassified error is retried at most once.
//! Backoff grows exponentially with ±20% jitter, capped, so repeated
//! failures never hammer the payment provider in lockstep.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExitFeeError;
use crate::gateway::{GatewayError, TeamError};

/// Stable failure categories used for retry decisions, event payloads, and
/// user-facing messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    PaymentFailure,
    NetworkError,
    InsufficientFunds,
    ValidationError,
    SystemError,
    UserCancellation,
    TeamConstraint,
    LightningNetwork,
    Timeout,
    Unknown,
}

impl ErrorCategory {
    /// Whether this category is ever worth retrying. Funds, constraints,
    /// and validation problems will not fix themselves on a retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::UserCancellation
                | Self::InsufficientFunds
                | Self::TeamConstraint
                | Self::ValidationError
        )
    }

    /// Attempt ceiling for this category. The retry loop also respects the
    /// configured overall maximum; the effective ceiling is the smaller.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::NetworkError | Self::Timeout => 3,
            Self::PaymentFailure | Self::LightningNetwork => 2,
            Self::SystemError => 2,
            Self::Unknown => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PaymentFailure => "payment_failure",
            Self::NetworkError => "network_error",
            Self::InsufficientFunds => "insufficient_funds",
            Self::ValidationError => "validation_error",
            Self::SystemError => "system_error",
            Self::UserCancellation => "user_cancellation",
            Self::TeamConstraint => "team_constraint",
            Self::LightningNetwork => "lightning_network",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Classify a payment gateway failure.
pub fn categorize_gateway_error(error: &GatewayError) -> ErrorCategory {
    match error {
        GatewayError::NotAuthenticated => ErrorCategory::SystemError,
        GatewayError::InsufficientBalance => ErrorCategory::InsufficientFunds,
        GatewayError::Network(_) => ErrorCategory::NetworkError,
        GatewayError::Timeout(_) => ErrorCategory::Timeout,
        GatewayError::Lightning(_) => ErrorCategory::LightningNetwork,
        GatewayError::PaymentRejected(_) => ErrorCategory::PaymentFailure,
        GatewayError::Provider(_) => ErrorCategory::PaymentFailure,
    }
}

/// Classify a team membership failure.
pub fn categorize_team_error(error: &TeamError) -> ErrorCategory {
    match error {
        TeamError::TeamNotFound(_)
        | TeamError::TeamFull(_)
        | TeamError::NotOnTeam { .. }
        | TeamError::AlreadyOnTeam { .. } => ErrorCategory::TeamConstraint,
        TeamError::Storage(_) => ErrorCategory::SystemError,
    }
}

/// Classify an operation-level error for messaging and event payloads.
pub fn categorize(error: &ExitFeeError) -> ErrorCategory {
    match error {
        ExitFeeError::OperationInProgress => ErrorCategory::SystemError,
        ExitFeeError::InvalidOperation => ErrorCategory::ValidationError,
        ExitFeeError::PaymentFailed(_) => ErrorCategory::PaymentFailure,
        ExitFeeError::TeamChangesFailed(_) => ErrorCategory::TeamConstraint,
        ExitFeeError::MaxRetriesExceeded => ErrorCategory::PaymentFailure,
        ExitFeeError::OperationExpired => ErrorCategory::ValidationError,
        ExitFeeError::CompensationRequired => ErrorCategory::SystemError,
        ExitFeeError::Store(_) => ErrorCategory::SystemError,
        ExitFeeError::StateMachine(_) => ErrorCategory::SystemError,
    }
}

/// Backoff and retry bounds. Category-specific base delays: network issues
/// retry quickly, payment issues wait longer, system errors longest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    /// Fractional jitter applied symmetrically (0.2 = ±20%).
    pub jitter_factor: f64,
    pub max_delay: Duration,
    pub network_base_delay: Duration,
    pub payment_base_delay: Duration,
    pub system_base_delay: Duration,
    pub default_base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: crate::constants::DEFAULT_MAX_RETRIES,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
            max_delay: Duration::from_secs(30),
            network_base_delay: Duration::from_secs(2),
            payment_base_delay: Duration::from_secs(5),
            system_base_delay: Duration::from_secs(10),
            default_base_delay: Duration::from_secs(3),
        }
    }
}

/// Decides whether a failed attempt is retried and how long to wait first.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Whether another attempt should be made after `attempts_made`
    /// attempts have already failed.
    pub fn should_retry(&self, category: ErrorCategory, attempts_made: u32) -> bool {
        if !category.is_retryable() {
            return false;
        }
        if attempts_made >= self.config.max_retries {
            return false;
        }
        attempts_made < category.max_attempts()
    }

    /// Delay before the next attempt: exponential in the attempt number,
    /// jittered, capped.
    pub fn retry_delay(&self, category: ErrorCategory, attempts_made: u32) -> Duration {
        let base = match category {
            ErrorCategory::NetworkError | ErrorCategory::Timeout => {
                self.config.network_base_delay
            }
            ErrorCategory::PaymentFailure | ErrorCategory::LightningNetwork => {
                self.config.payment_base_delay
            }
            ErrorCategory::SystemError => self.config.system_base_delay,
            _ => self.config.default_base_delay,
        };

        let exponent = attempts_made.saturating_sub(1) as i32;
        let exponential = base.mul_f64(self.config.backoff_multiplier.powi(exponent));

        let jittered = if self.config.jitter_factor > 0.0 {
            let offset = (fastrand::f64() * 2.0 - 1.0) * self.config.jitter_factor;
            exponential.mul_f64(1.0 + offset)
        } else {
            exponential
        };

        jittered.min(self.config.max_delay)
    }
}

/// Log-level grading for a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

pub fn severity(category: ErrorCategory, attempts_made: u32) -> ErrorSeverity {
    match category {
        ErrorCategory::UserCancellation => ErrorSeverity::Low,
        ErrorCategory::InsufficientFunds
        | ErrorCategory::TeamConstraint
        | ErrorCategory::ValidationError => ErrorSeverity::Low,
        ErrorCategory::NetworkError | ErrorCategory::Timeout => {
            if attempts_made > 2 {
                ErrorSeverity::Medium
            } else {
                ErrorSeverity::Low
            }
        }
        ErrorCategory::PaymentFailure | ErrorCategory::LightningNetwork => {
            if attempts_made > 1 {
                ErrorSeverity::High
            } else {
                ErrorSeverity::Medium
            }
        }
        ErrorCategory::SystemError => ErrorSeverity::High,
        ErrorCategory::Unknown => ErrorSeverity::Critical,
    }
}

/// Stable user-facing rendering of a failure category. Help links are left
/// to the consuming surface; the library supplies title, body, and whether
/// offering a retry makes sense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserErrorMessage {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
    pub secondary_action: Option<String>,
    pub can_retry: bool,
}

pub fn user_message(category: ErrorCategory) -> UserErrorMessage {
    match category {
        ErrorCategory::PaymentFailure => UserErrorMessage {
            title: "Payment Failed".to_string(),
            message: "Your exit fee payment could not be processed. Your team \
                      membership is unchanged. Please try again or contact support \
                      if the problem persists."
                .to_string(),
            action: Some("Try Again".to_string()),
            secondary_action: Some("Contact Support".to_string()),
            can_retry: true,
        },
        ErrorCategory::NetworkError => UserErrorMessage {
            title: "Connection Problem".to_string(),
            message: "Unable to process your exit fee due to a network issue. \
                      Please check your internet connection and try again."
                .to_string(),
            action: Some("Try Again".to_string()),
            secondary_action: None,
            can_retry: true,
        },
        ErrorCategory::InsufficientFunds => UserErrorMessage {
            title: "Insufficient Funds".to_string(),
            message: "You need 2,000 sats to leave your team. Please add funds to \
                      your wallet and try again."
                .to_string(),
            action: Some("Add Funds".to_string()),
            secondary_action: Some("Cancel".to_string()),
            can_retry: false,
        },
        ErrorCategory::ValidationError => UserErrorMessage {
            title: "Invalid Request".to_string(),
            message: "This team operation cannot be completed right now. Please \
                      refresh and try again."
                .to_string(),
            action: Some("Refresh".to_string()),
            secondary_action: None,
            can_retry: false,
        },
        ErrorCategory::SystemError => UserErrorMessage {
            title: "System Error".to_string(),
            message: "An unexpected error occurred. Please try again or contact \
                      support if the problem persists."
                .to_string(),
            action: Some("Try Again".to_string()),
            secondary_action: Some("Contact Support".to_string()),
            can_retry: true,
        },
        ErrorCategory::UserCancellation => UserErrorMessage {
            title: "Operation Cancelled".to_string(),
            message: "You cancelled the operation. Your team membership is \
                      unchanged."
                .to_string(),
            action: Some("OK".to_string()),
            secondary_action: None,
            can_retry: false,
        },
        ErrorCategory::TeamConstraint => UserErrorMessage {
            title: "Team Change Unavailable".to_string(),
            message: "This team change cannot be completed. The team may be full, \
                      no longer exist, or your membership may have changed."
                .to_string(),
            action: Some("Browse Teams".to_string()),
            secondary_action: Some("Cancel".to_string()),
            can_retry: false,
        },
        ErrorCategory::LightningNetwork => UserErrorMessage {
            title: "Lightning Network Error".to_string(),
            message: "There was an issue with the Lightning Network payment. \
                      Please try again in a few moments."
                .to_string(),
            action: Some("Try Again".to_string()),
            secondary_action: None,
            can_retry: true,
        },
        ErrorCategory::Timeout => UserErrorMessage {
            title: "Request Timed Out".to_string(),
            message: "The operation took too long to complete. Your team \
                      membership is unchanged. Please try again."
                .to_string(),
            action: Some("Try Again".to_string()),
            secondary_action: None,
            can_retry: true,
        },
        ErrorCategory::Unknown => UserErrorMessage {
            title: "Unexpected Error".to_string(),
            message: "Something went wrong. Please try again or contact support \
                      if the issue continues."
                .to_string(),
            action: Some("Try Again".to_string()),
            secondary_action: Some("Contact Support".to_string()),
            can_retry: true,
        },
    }
}

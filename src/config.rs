//! Crate configuration.
//!
//! Plain serde structs with production defaults; callers override fields or
//! load from their own configuration tree. `validate()` rejects values the
//! saga cannot operate with.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_MAX_RETRIES, DEFAULT_OPERATION_TIMEOUT_HOURS,
    EXIT_FEE_AMOUNT_SATS, PLATFORM_LIGHTNING_ADDRESS,
};
use crate::orchestration::error_classifier::RetryConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitFeeConfig {
    /// Fee in satoshis. Platform policy; never read from user input.
    pub fee_amount_sats: i64,
    /// Platform receiving address for all exit fees.
    pub lightning_address: String,
    /// Age after which an unpaid operation is considered abandoned.
    pub operation_timeout_hours: i64,
    pub event_channel_capacity: usize,
    pub retry: RetryConfig,
}

impl Default for ExitFeeConfig {
    fn default() -> Self {
        Self {
            fee_amount_sats: EXIT_FEE_AMOUNT_SATS,
            lightning_address: PLATFORM_LIGHTNING_ADDRESS.to_string(),
            operation_timeout_hours: DEFAULT_OPERATION_TIMEOUT_HOURS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            retry: RetryConfig::default(),
        }
    }
}

impl ExitFeeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.fee_amount_sats <= 0 {
            return Err("fee_amount_sats must be positive".to_string());
        }
        if self.lightning_address.is_empty() {
            return Err("lightning_address must not be empty".to_string());
        }
        if self.operation_timeout_hours <= 0 {
            return Err("operation_timeout_hours must be positive".to_string());
        }
        if self.retry.max_retries == 0 {
            return Err("retry.max_retries must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err("retry.jitter_factor must be within [0, 1]".to_string());
        }
        Ok(())
    }
}

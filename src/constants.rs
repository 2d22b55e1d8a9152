//! Fixed operational constants for exit-fee processing.
//!
//! The fee amount and receiving address are platform policy, never derived
//! from user input. Everything else here is a default that
//! [`crate::config::ExitFeeConfig`] can override.

/// Exit fee charged for every leave or switch, in satoshis.
pub const EXIT_FEE_AMOUNT_SATS: i64 = 2000;

/// Platform-controlled Lightning address that receives every exit fee.
pub const PLATFORM_LIGHTNING_ADDRESS: &str = "exitfees@coinos.io";

/// Default maximum number of payment attempts per operation.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default age after which an unpaid operation is considered abandoned.
pub const DEFAULT_OPERATION_TIMEOUT_HOURS: i64 = 24;

/// Default capacity of the operation event broadcast channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;

// Orchestration: the saga engine and its supporting policy pieces.

pub mod error_classifier;
pub mod guard;
pub mod orchestrator;

pub use error_classifier::{
    categorize, categorize_gateway_error, categorize_team_error, severity, user_message,
    ErrorCategory, ErrorSeverity, RetryConfig, RetryPolicy, UserErrorMessage,
};
pub use guard::ActiveOperationGuard;
pub use orchestrator::{ExitFeeOrchestrator, ResumeReport};

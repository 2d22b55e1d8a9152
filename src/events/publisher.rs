use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::OperationEvent;
use crate::orchestration::error_classifier::ErrorCategory;
use crate::state_machine::ExitFeeStatus;

/// Broadcast publisher for operation lifecycle events.
///
/// Cloning shares the underlying channel. Publishing to zero subscribers is
/// a success: events are monitoring signal, not control flow.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<OperationEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn state_transition(
        &self,
        operation_id: Uuid,
        user_id: &str,
        from: ExitFeeStatus,
        to: ExitFeeStatus,
        duration: Duration,
    ) {
        self.publish(OperationEvent::StateTransition {
            operation_id,
            user_id: user_id.to_string(),
            from,
            to,
            duration,
            published_at: Utc::now(),
        });
    }

    pub fn payment_attempt(
        &self,
        operation_id: Uuid,
        user_id: &str,
        attempt_number: u32,
        success: bool,
        error_category: Option<ErrorCategory>,
    ) {
        self.publish(OperationEvent::PaymentAttempt {
            operation_id,
            user_id: user_id.to_string(),
            attempt_number,
            success,
            error_category,
            published_at: Utc::now(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn team_switch(
        &self,
        operation_id: Uuid,
        user_id: &str,
        from_team_id: Option<&str>,
        to_team_id: Option<&str>,
        duration: Duration,
        success: bool,
    ) {
        self.publish(OperationEvent::TeamSwitch {
            operation_id,
            user_id: user_id.to_string(),
            from_team_id: from_team_id.map(String::from),
            to_team_id: to_team_id.map(String::from),
            duration,
            success,
            published_at: Utc::now(),
        });
    }

    fn publish(&self, event: OperationEvent) {
        // send() errors only when there are no subscribers; that is an
        // acceptable outcome for fire-and-forget monitoring events.
        let _ = self.sender.send(event);
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}

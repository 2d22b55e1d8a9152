//! Admission control: at most one in-flight operation per user within this
//! process.
//!
//! The guard is a derived cache for fast rejection; the durable single-
//! flight invariant is the operation store's conditional insert. A second
//! orchestrator instance behind a load balancer is therefore still safe,
//! just slower to reject duplicates.

use dashmap::DashSet;

#[derive(Debug, Default)]
pub struct ActiveOperationGuard {
    users: DashSet<String>,
}

impl ActiveOperationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the user's slot. Returns false if an operation is
    /// already in flight for this user.
    pub fn admit(&self, user_id: &str) -> bool {
        self.users.insert(user_id.to_string())
    }

    /// Release the user's slot; called on every terminal transition.
    pub fn release(&self, user_id: &str) {
        self.users.remove(user_id);
    }

    pub fn is_active(&self, user_id: &str) -> bool {
        self.users.contains(user_id)
    }

    pub fn active_count(&self) -> usize {
        self.users.len()
    }
}

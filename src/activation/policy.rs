//! Idle eviction rule evaluated on every ping.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::activation::state::DeactivationReason;

/// Evicts an activation once it has lived longer than `idle_threshold`.
///
/// Stateless: it owns no timer, so an activation that is never pinged is
/// never evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleEvictionPolicy {
    idle_threshold: Duration,
}

impl IdleEvictionPolicy {
    pub fn new(idle_threshold: Duration) -> Self {
        Self { idle_threshold }
    }

    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    /// Returns a reason iff `now - created_at > idle_threshold`.
    pub fn evaluate(
        &self,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DeactivationReason> {
        // Negative when the clock went backwards; `to_std` rejects those.
        let elapsed = now.signed_duration_since(created_at).to_std().ok()?;
        (elapsed > self.idle_threshold).then_some(DeactivationReason::IdleTimeout {
            idle_for: elapsed,
        })
    }
}

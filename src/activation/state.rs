//! Activation lifecycle state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    /// Constructor ran, background task is being started.
    Activating,
    /// Serving pings, background task ticking.
    Active,
    /// Cancellation signalled, drain in progress.
    Deactivating,
    /// Drain complete. Never reused.
    Terminated,
}

impl ActivationState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: ActivationState) -> bool {
        use ActivationState::*;

        matches!(
            (self, target),
            (Activating, Active)
                | (Activating, Deactivating)
                | (Active, Deactivating)
                | (Deactivating, Terminated)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Whether the activation still accepts new work.
    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Activating | Self::Active)
    }
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Deactivating => "deactivating",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Why an activation was deactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeactivationReason {
    /// The idle policy fired on a ping.
    IdleTimeout { idle_for: Duration },
    /// Explicit request from a caller.
    Requested { detail: String },
    /// The hosting process is shutting down.
    HostShutdown,
    /// Every handle to the activation was dropped.
    Abandoned,
}

impl DeactivationReason {
    pub fn requested(detail: impl Into<String>) -> Self {
        Self::Requested {
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for DeactivationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdleTimeout { idle_for } => write!(f, "idle for {}s", idle_for.as_secs()),
            Self::Requested { detail } => write!(f, "requested: {detail}"),
            Self::HostShutdown => write!(f, "host shutdown"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Point-in-time view of an activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationInfo {
    pub key: String,
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub state: ActivationState,
}

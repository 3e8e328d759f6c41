//! Activation system — one keyed worker with idle eviction.
//!
//! Core components:
//! - `state` — Lifecycle state machine (Activating → Active → Deactivating → Terminated)
//! - `policy` — Idle eviction rule evaluated on every ping
//! - `task` — Periodic background task with cooperative cancellation
//! - `actor` — Activation turn loop, handle, and drain protocol

pub mod actor;
pub mod policy;
pub mod state;
pub mod task;

pub use actor::{Activation, ActivationDeps, ActivationHandle, DrainOutcome};
pub use policy::IdleEvictionPolicy;
pub use state::{ActivationInfo, ActivationState, DeactivationReason};
pub use task::{Heartbeat, LogHeartbeat, run_background_task};

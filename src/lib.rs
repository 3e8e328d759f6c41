//! Idle Activation — keyed singleton workers with prober-driven idle eviction.

pub mod activation;
pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod prober;

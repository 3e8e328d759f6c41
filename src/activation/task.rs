//! Periodic background task owned by an activation.
//!
//! The loop checks its cancellation token before every beat and waits out the
//! interval in a `select!` against the same token, so a drain never has to sit
//! through a full interval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::HeartbeatError;

/// One unit of periodic work.
#[async_trait]
pub trait Heartbeat: Send + Sync {
    async fn beat(&self, key: &str, tick: u64) -> Result<(), HeartbeatError>;
}

/// Default heartbeat: one log line per tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHeartbeat;

#[async_trait]
impl Heartbeat for LogHeartbeat {
    async fn beat(&self, key: &str, tick: u64) -> Result<(), HeartbeatError> {
        info!(key = %key, tick, "Heartbeat");
        Ok(())
    }
}

/// Run until `cancel` fires. Returns the first heartbeat error, which ends the
/// loop and is reported when the owning activation drains.
pub async fn run_background_task(
    key: String,
    heartbeat: Arc<dyn Heartbeat>,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<(), HeartbeatError> {
    let mut tick: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        heartbeat.beat(&key, tick).await?;
        tick += 1;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!(key = %key, ticks = tick, "Background task observed cancellation");
    Ok(())
}

//! Prober loop — keeps a well-known key's activation pinged.
//!
//! Each iteration resolves the key and pings it. Failures are logged and the
//! loop carries on at the same cadence: no backoff, no failure cap. A failing
//! iteration still waits out its interval, so a persistent fault produces one
//! log line per interval rather than a tight loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::directory::ActivationDirectory;
use crate::error::Error;

/// Counters reported when the prober stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub attempts: u64,
    pub failures: u64,
}

/// Periodically resolves `key` and pings it.
pub struct Prober {
    directory: Arc<dyn ActivationDirectory>,
    key: String,
    interval: Duration,
}

impl Prober {
    pub fn new(
        directory: Arc<dyn ActivationDirectory>,
        key: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            directory,
            key: key.into(),
            interval,
        }
    }

    /// Resolve and ping once.
    pub async fn probe_once(&self) -> Result<(), Error> {
        let activation = self.directory.resolve_or_create(&self.key).await?;
        activation.ping().await?;
        debug!(key = %self.key, activation_id = %activation.id(), "Probe succeeded");
        Ok(())
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> ProbeSummary {
        info!(
            key = %self.key,
            "Prober started (interval: {}ms)",
            self.interval.as_millis()
        );

        let mut summary = ProbeSummary::default();
        let mut consecutive_failures: u64 = 0;
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // First tick fires immediately
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }

            summary.attempts += 1;
            match self.probe_once().await {
                Ok(()) => consecutive_failures = 0,
                Err(e) => {
                    summary.failures += 1;
                    consecutive_failures += 1;
                    error!(
                        key = %self.key,
                        error = %e,
                        consecutive_failures,
                        "Probe failed"
                    );
                }
            }
        }

        info!(
            key = %self.key,
            attempts = summary.attempts,
            failures = summary.failures,
            "Prober shutting down"
        );
        summary
    }
}

/// Spawn a prober on the runtime. Cancel `shutdown` to stop it.
pub fn spawn_prober(
    directory: Arc<dyn ActivationDirectory>,
    key: impl Into<String>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<ProbeSummary> {
    let prober = Prober::new(directory, key, interval);
    tokio::spawn(prober.run(shutdown))
}

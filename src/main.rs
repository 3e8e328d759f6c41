use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use idle_activation::activation::LogHeartbeat;
use idle_activation::clock::SystemClock;
use idle_activation::config::HostConfig;
use idle_activation::directory::{ActivationDirectory, LocalDirectory};
use idle_activation::prober::spawn_prober;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = HostConfig::from_env()?;

    eprintln!("Idle Activation v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Probe key: {}", config.probe_key);
    eprintln!("   Idle threshold: {}s", config.idle_threshold.as_secs());
    eprintln!(
        "   Heartbeat: every {}ms, probe: every {}ms",
        config.heartbeat_interval.as_millis(),
        config.probe_interval.as_millis()
    );
    eprintln!("   Press Ctrl-C to stop.\n");

    let directory = LocalDirectory::new(&config, Arc::new(SystemClock), Arc::new(LogHeartbeat));

    let shutdown = CancellationToken::new();
    let prober = spawn_prober(
        Arc::clone(&directory) as Arc<dyn ActivationDirectory>,
        config.probe_key.clone(),
        config.probe_interval,
        shutdown.clone(),
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    shutdown.cancel();
    let summary = prober.await?;

    for info in directory.list().await {
        tracing::info!(activation = %serde_json::to_string(&info)?, "Draining");
    }
    directory.shutdown().await;

    tracing::info!(
        attempts = summary.attempts,
        failures = summary.failures,
        "Host stopped"
    );
    Ok(())
}

//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Upper bound on an activation's mailbox.
pub const MAX_MAILBOX_CAPACITY: usize = 65_536;

/// Tunables for the activation host.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// An activation older than this is evicted on its next ping.
    pub idle_threshold: Duration,
    /// Cadence of the per-activation background heartbeat.
    pub heartbeat_interval: Duration,
    /// Cadence of the prober loop.
    pub probe_interval: Duration,
    /// Well-known key the prober keeps alive.
    pub probe_key: String,
    /// Bounded mailbox size for each activation's turn queue.
    pub mailbox_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(60), // 1 minute
            heartbeat_interval: Duration::from_secs(1),
            probe_interval: Duration::from_secs(1),
            probe_key: "1".to_string(),
            mailbox_capacity: 64,
        }
    }
}

impl HostConfig {
    /// Load configuration from `ACTIVATION_*` environment variables.
    ///
    /// Missing variables fall back to [`HostConfig::default`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let idle_threshold = parse_var(&lookup, "ACTIVATION_IDLE_THRESHOLD_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.idle_threshold);

        let heartbeat_interval = parse_var(&lookup, "ACTIVATION_HEARTBEAT_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.heartbeat_interval);

        let probe_interval = parse_var(&lookup, "ACTIVATION_PROBE_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.probe_interval);

        let probe_key = lookup("ACTIVATION_PROBE_KEY")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.probe_key);

        let mailbox_capacity = parse_var(&lookup, "ACTIVATION_MAILBOX_CAPACITY")?
            .map(|n| {
                usize::try_from(n).map_err(|e| ConfigError::InvalidValue {
                    key: "ACTIVATION_MAILBOX_CAPACITY".to_string(),
                    message: format!("{n}: {e}"),
                })
            })
            .transpose()?
            .unwrap_or(defaults.mailbox_capacity);

        let config = Self {
            idle_threshold,
            heartbeat_interval,
            probe_interval,
            probe_key,
            mailbox_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero_checks = [
            ("idle_threshold", self.idle_threshold.is_zero()),
            ("heartbeat_interval", self.heartbeat_interval.is_zero()),
            ("probe_interval", self.probe_interval.is_zero()),
            ("mailbox_capacity", self.mailbox_capacity == 0),
        ];
        if let Some((key, _)) = zero_checks.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.mailbox_capacity > MAX_MAILBOX_CAPACITY {
            return Err(ConfigError::InvalidValue {
                key: "mailbox_capacity".to_string(),
                message: format!("must be at most {MAX_MAILBOX_CAPACITY}"),
            });
        }
        Ok(())
    }
}

fn parse_var<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}

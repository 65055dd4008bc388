//! Periodic eviction of finished jobs from memory.
//!
//! Spawns a background loop that calls [`JobManager::sweep`] on a fixed
//! interval using `tokio::time::interval`. Evicted jobs stay readable
//! through the durable store.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::manager::JobManager;

/// Default sweep interval: 10 minutes.
const DEFAULT_INTERVAL_SECS: u64 = 600;

/// Default retention for finished jobs: 1 hour.
const DEFAULT_RETENTION_SECS: u64 = 3600;

/// Sweeper timing.
///
/// | Env var                   | Default |
/// |---------------------------|---------|
/// | `JOB_SWEEP_INTERVAL_SECS` | `600`   |
/// | `JOB_RETENTION_SECS`      | `3600`  |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Finished jobs untouched for longer than this are evicted.
    pub max_age: Duration,
}

impl SweepConfig {
    pub fn from_env() -> Self {
        Self {
            interval: Duration::from_secs(secs_from_env(
                "JOB_SWEEP_INTERVAL_SECS",
                DEFAULT_INTERVAL_SECS,
            )),
            max_age: Duration::from_secs(secs_from_env("JOB_RETENTION_SECS", DEFAULT_RETENTION_SECS)),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            max_age: Duration::from_secs(DEFAULT_RETENTION_SECS),
        }
    }
}

fn secs_from_env(key: &str, default: u64) -> u64 {
    parse_secs(std::env::var(key).ok().as_deref(), default)
}

/// Positive whole seconds, otherwise `default`.
fn parse_secs(raw: Option<&str>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&secs| secs > 0)
        .unwrap_or(default)
}

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(manager: Arc<JobManager>, config: SweepConfig, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = config.interval.as_secs(),
        max_age_secs = config.max_age.as_secs(),
        "Job sweeper started"
    );

    let mut interval = tokio::time::interval(config.interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job sweeper stopping");
                break;
            }
            _ = interval.tick() => {
                let evicted = manager.sweep(config.max_age);
                if evicted == 0 {
                    tracing::debug!(in_memory = manager.len(), "Job sweep: nothing to evict");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_secs_accepts_positive_integers() {
        assert_eq!(parse_secs(Some("30"), 600), 30);
        assert_eq!(parse_secs(Some(" 45 "), 600), 45);
    }

    #[test]
    fn parse_secs_falls_back_on_bad_input() {
        assert_eq!(parse_secs(None, 600), 600);
        assert_eq!(parse_secs(Some("0"), 600), 600);
        assert_eq!(parse_secs(Some("-5"), 600), 600);
        assert_eq!(parse_secs(Some("ten"), 600), 600);
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = SweepConfig::default();
        assert_eq!(config.interval, Duration::from_secs(600));
        assert_eq!(config.max_age, Duration::from_secs(3600));
    }
}

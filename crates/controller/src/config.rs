use std::time::Duration;

use dossier_cloud::DispatcherConfig;
use dossier_jobs::manager::DEFAULT_DRAIN_TIMEOUT;
use dossier_jobs::SweepConfig;
use dossier_store::StoreConfig;

/// Controller configuration loaded from environment variables.
///
/// Each component reads its own variables; see [`StoreConfig`],
/// [`DispatcherConfig`], and [`SweepConfig`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub store: StoreConfig,
    pub dispatcher: DispatcherConfig,
    pub sweep: SweepConfig,
    /// Upper bound on draining work at shutdown (default: `10` seconds).
    pub shutdown_timeout: Duration,
    /// Emit logs as JSON lines instead of human-readable text.
    pub json_logs: bool,
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default |
    /// |-------------------------|---------|
    /// | `SHUTDOWN_TIMEOUT_SECS` | `10`    |
    /// | `LOG_FORMAT`            | `text`  |
    pub fn from_env() -> Self {
        let shutdown_timeout = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_DRAIN_TIMEOUT);

        let json_logs = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Self {
            store: StoreConfig::from_env(),
            dispatcher: DispatcherConfig::from_env(),
            sweep: SweepConfig::from_env(),
            shutdown_timeout,
            json_logs,
        }
    }
}

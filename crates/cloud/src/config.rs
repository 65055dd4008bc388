use std::collections::BTreeMap;
use std::time::Duration;

/// Fly Machines API base URL.
pub const DEFAULT_API_URL: &str = "https://api.machines.dev/v1";

/// Credentials forwarded from the controller's environment to every worker.
pub const PASSTHROUGH_ENV: &[&str] = &[
    "DATABASE_URL",
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "PERPLEXITY_API_KEY",
];

/// Worker dispatch configuration loaded from environment variables.
///
/// Without `FLY_API_TOKEN` the dispatcher reports itself unavailable and
/// every provisioning call fails fast.
#[derive(Clone)]
pub struct DispatcherConfig {
    /// Provisioning credential (`FLY_API_TOKEN`).
    pub api_token: Option<String>,
    /// App that owns the worker machines.
    pub app_name: String,
    /// Provisioning API base URL.
    pub api_url: String,
    /// Container image each worker boots.
    pub image: String,
    /// Region workers are placed in.
    pub region: String,
    /// Guest CPU class (`shared` or `performance`).
    pub cpu_kind: String,
    pub cpus: u32,
    pub memory_mb: u32,
    /// Delay between readiness polls.
    pub poll_interval: Duration,
    /// Upper bound on waiting for a worker to start.
    pub ready_timeout: Duration,
    /// Credentials forwarded to workers, from [`PASSTHROUGH_ENV`].
    pub passthrough_env: BTreeMap<String, String>,
}

impl DispatcherConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                                 |
    /// |-----------------------------|-----------------------------------------|
    /// | `FLY_API_TOKEN`             | unset (dispatcher unavailable)          |
    /// | `FLY_APP_NAME`              | `dossier-workers`                       |
    /// | `FLY_API_URL`               | `https://api.machines.dev/v1`           |
    /// | `WORKER_IMAGE`              | `registry.fly.io/dossier-worker:latest` |
    /// | `WORKER_REGION`             | `iad`                                   |
    /// | `WORKER_CPU_KIND`           | `shared`                                |
    /// | `WORKER_CPUS`               | `2`                                     |
    /// | `WORKER_MEMORY_MB`          | `4096`                                  |
    /// | `WORKER_POLL_INTERVAL_MS`   | `2000`                                  |
    /// | `WORKER_READY_TIMEOUT_SECS` | `120`                                   |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let string = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let passthrough_env = PASSTHROUGH_ENV
            .iter()
            .filter_map(|&key| var(key).map(|value| (key.to_string(), value)))
            .collect();

        Self {
            api_token: var("FLY_API_TOKEN"),
            app_name: string("FLY_APP_NAME", "dossier-workers"),
            api_url: string("FLY_API_URL", DEFAULT_API_URL)
                .trim_end_matches('/')
                .to_string(),
            image: string("WORKER_IMAGE", "registry.fly.io/dossier-worker:latest"),
            region: string("WORKER_REGION", "iad"),
            cpu_kind: string("WORKER_CPU_KIND", "shared"),
            cpus: parse_or("WORKER_CPUS", var("WORKER_CPUS"), 2),
            memory_mb: parse_or("WORKER_MEMORY_MB", var("WORKER_MEMORY_MB"), 4096),
            poll_interval: Duration::from_millis(parse_or(
                "WORKER_POLL_INTERVAL_MS",
                var("WORKER_POLL_INTERVAL_MS"),
                2000,
            )),
            ready_timeout: Duration::from_secs(parse_or(
                "WORKER_READY_TIMEOUT_SECS",
                var("WORKER_READY_TIMEOUT_SECS"),
                120,
            )),
            passthrough_env,
        }
    }

    /// Whether the provisioning credential is present.
    pub fn has_credential(&self) -> bool {
        self.api_token.is_some()
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl std::fmt::Debug for DispatcherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherConfig")
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("app_name", &self.app_name)
            .field("api_url", &self.api_url)
            .field("image", &self.image)
            .field("region", &self.region)
            .field("cpu_kind", &self.cpu_kind)
            .field("cpus", &self.cpus)
            .field("memory_mb", &self.memory_mb)
            .field("poll_interval", &self.poll_interval)
            .field("ready_timeout", &self.ready_timeout)
            .field("passthrough_env", &self.passthrough_env.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Parse a positive number, logging and falling back on bad input.
fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => value,
        _ => {
            tracing::warn!(key, value = %raw, "Ignoring invalid value, using default");
            default
        }
    }
}

//! Dispatches jobs to single-shot compute workers.
//!
//! [`WorkerDispatcher`] names and configures a worker for a job, provisions
//! it through a [`ComputeProvider`], waits for it to start, and tears it
//! down on request. Teardown is best-effort: failures are logged, never
//! returned.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DispatcherConfig;
use crate::fly::FlyMachinesProvider;
use crate::poll::{poll_until, PollError, PollVerdict};
use crate::provider::{
    ComputeProvider, GuestSpec, MachineRequest, ProviderError, WorkerHandle, WorkerState,
};
use crate::registry::WorkerRegistry;

/// Longest slug prefix kept in a worker name.
const MAX_SLUG_LEN: usize = 40;

/// Number of trailing job-id characters appended to a worker name.
const JOB_SUFFIX_LEN: usize = 8;

/// Errors from worker dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The dispatcher has no provisioning credential.
    #[error("Worker dispatch is not configured: {0}")]
    Configuration(String),

    /// A provisioning API call failed.
    #[error("Provisioning request failed: {0}")]
    Provisioning(#[from] ProviderError),

    /// The worker did not start within the allowed time.
    #[error("Worker {worker_id} did not start within {timeout:?}")]
    Timeout { worker_id: String, timeout: Duration },

    /// The worker reached a state it cannot start from.
    #[error("Worker {worker_id} entered terminal state '{state}'")]
    TerminalState {
        worker_id: String,
        state: WorkerState,
    },
}

/// Provisions, tracks, and reclaims per-job workers.
pub struct WorkerDispatcher {
    config: DispatcherConfig,
    provider: Option<Arc<dyn ComputeProvider>>,
    registry: WorkerRegistry,
}

impl WorkerDispatcher {
    /// Build a dispatcher backed by Fly Machines. Without a credential the
    /// dispatcher is unavailable.
    pub fn from_config(config: DispatcherConfig) -> Self {
        let provider = FlyMachinesProvider::from_config(&config)
            .map(|fly| Arc::new(fly) as Arc<dyn ComputeProvider>);
        Self {
            config,
            provider,
            registry: WorkerRegistry::new(),
        }
    }

    /// Build a dispatcher over any provider. Availability still follows the
    /// credential in `config`.
    pub fn with_provider(config: DispatcherConfig, provider: Arc<dyn ComputeProvider>) -> Self {
        Self {
            config,
            provider: Some(provider),
            registry: WorkerRegistry::new(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Whether the provisioning credential is configured.
    pub fn is_available(&self) -> bool {
        self.config.has_credential() && self.provider.is_some()
    }

    // ---- provisioning ----

    /// Provision a worker for `job_id`.
    ///
    /// `extra_env` is applied last and overrides any generated variable.
    /// Fails with [`DispatchError::Configuration`] before any network call
    /// when the dispatcher is unavailable.
    pub async fn create(
        &self,
        job_id: &str,
        slug: &str,
        extra_env: BTreeMap<String, String>,
    ) -> Result<WorkerHandle, DispatchError> {
        let provider = self.provider()?;

        let request = MachineRequest {
            name: worker_name(slug, job_id),
            region: self.config.region.clone(),
            image: self.config.image.clone(),
            env: self.worker_env(job_id, slug, extra_env),
            guest: GuestSpec {
                cpu_kind: self.config.cpu_kind.clone(),
                cpus: self.config.cpus,
                memory_mb: self.config.memory_mb,
            },
        };

        tracing::info!(
            job_id = %job_id,
            name = %request.name,
            region = %request.region,
            "Provisioning worker",
        );

        let handle = provider.create_machine(&request).await.map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "Worker provisioning failed");
            DispatchError::Provisioning(e)
        })?;

        tracing::info!(
            job_id = %job_id,
            worker_id = %handle.worker_id,
            state = %handle.state,
            "Worker provisioned",
        );
        Ok(handle)
    }

    /// Fetch a worker's current handle once.
    pub async fn get_state(&self, worker_id: &str) -> Result<WorkerHandle, DispatchError> {
        Ok(self.provider()?.get_machine(worker_id).await?)
    }

    /// Poll until the worker has started.
    ///
    /// Polls every `poll_interval` from config. A `failed` or `destroyed`
    /// worker ends the wait at once with [`DispatchError::TerminalState`].
    pub async fn wait_until_ready(
        &self,
        worker_id: &str,
        timeout: Duration,
    ) -> Result<WorkerHandle, DispatchError> {
        let provider = Arc::clone(self.provider()?);

        let result = poll_until(
            self.config.poll_interval,
            timeout,
            || {
                let provider = Arc::clone(&provider);
                let worker_id = worker_id.to_string();
                async move { provider.get_machine(&worker_id).await }
            },
            |handle: &WorkerHandle| {
                if handle.state.is_ready() {
                    PollVerdict::Ready
                } else if handle.state.is_terminal() {
                    PollVerdict::Failed
                } else {
                    tracing::debug!(worker_id = %worker_id, state = %handle.state, "Waiting for worker");
                    PollVerdict::Pending
                }
            },
        )
        .await;

        match result {
            Ok(handle) => {
                tracing::info!(worker_id = %worker_id, "Worker started");
                Ok(handle)
            }
            Err(PollError::Terminal(handle)) => Err(DispatchError::TerminalState {
                worker_id: worker_id.to_string(),
                state: handle.state,
            }),
            Err(PollError::Timeout { attempts, .. }) => {
                tracing::warn!(worker_id = %worker_id, attempts, "Worker start timed out");
                Err(DispatchError::Timeout {
                    worker_id: worker_id.to_string(),
                    timeout,
                })
            }
            Err(PollError::Fetch(e)) => Err(DispatchError::Provisioning(e)),
        }
    }

    // ---- teardown ----

    /// Ask a worker to stop. Best-effort.
    pub async fn stop(&self, worker_id: &str) {
        let Some(provider) = self.available_provider() else {
            return;
        };
        match provider.stop_machine(worker_id).await {
            Ok(()) => tracing::info!(worker_id = %worker_id, "Worker stopped"),
            Err(e) => tracing::warn!(worker_id = %worker_id, error = %e, "Failed to stop worker"),
        }
    }

    /// Destroy a worker. Best-effort.
    pub async fn destroy(&self, worker_id: &str) {
        let Some(provider) = self.available_provider() else {
            return;
        };
        match provider.destroy_machine(worker_id).await {
            Ok(()) => tracing::info!(worker_id = %worker_id, "Worker destroyed"),
            Err(e) => tracing::warn!(worker_id = %worker_id, error = %e, "Failed to destroy worker"),
        }
    }

    /// Stop, destroy, and forget the worker tracked for `job_id`.
    ///
    /// Returns the reclaimed worker id, or `None` if none was tracked.
    pub async fn reclaim(&self, job_id: &str) -> Option<String> {
        let worker_id = self.registry.untrack(job_id)?;
        tracing::info!(job_id = %job_id, worker_id = %worker_id, "Reclaiming worker");
        self.stop(&worker_id).await;
        self.destroy(&worker_id).await;
        Some(worker_id)
    }

    // ---- registry ----

    pub fn track(&self, job_id: &str, worker_id: &str) {
        if let Some(previous) = self.registry.track(job_id, worker_id) {
            tracing::warn!(
                job_id = %job_id,
                previous = %previous,
                worker_id = %worker_id,
                "Replacing tracked worker",
            );
        }
    }

    pub fn get(&self, job_id: &str) -> Option<String> {
        self.registry.get(job_id)
    }

    pub fn untrack(&self, job_id: &str) -> Option<String> {
        self.registry.untrack(job_id)
    }

    // ---- private helpers ----

    fn provider(&self) -> Result<&Arc<dyn ComputeProvider>, DispatchError> {
        self.available_provider().ok_or_else(|| {
            DispatchError::Configuration("FLY_API_TOKEN is not set".to_string())
        })
    }

    fn available_provider(&self) -> Option<&Arc<dyn ComputeProvider>> {
        if self.config.has_credential() {
            self.provider.as_ref()
        } else {
            None
        }
    }

    /// Worker environment: identity, mode flag, forwarded credentials,
    /// then caller overrides.
    fn worker_env(
        &self,
        job_id: &str,
        slug: &str,
        extra_env: BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut env = BTreeMap::from([
            ("JOB_ID".to_string(), job_id.to_string()),
            ("REPORT_SLUG".to_string(), slug.to_string()),
            ("WORKER_MODE".to_string(), "true".to_string()),
        ]);
        env.extend(self.config.passthrough_env.clone());
        env.extend(extra_env);
        env
    }
}

/// Worker name: sanitized slug prefix, `-`, then the job id's tail.
///
/// Both parts are lowercased with anything outside `[a-z0-9-]` replaced by
/// `-`; the slug part is cut to 40 characters.
pub fn worker_name(slug: &str, job_id: &str) -> String {
    let prefix: String = sanitize(slug).chars().take(MAX_SLUG_LEN).collect();
    let chars: Vec<char> = job_id.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(JOB_SUFFIX_LEN)..]
        .iter()
        .collect();
    format!("{prefix}-{}", sanitize(&tail))
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

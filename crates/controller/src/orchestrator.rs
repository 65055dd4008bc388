//! Job launch and cancellation across the job manager and the dispatcher.
//!
//! [`JobManager::cancel`] only flips job status. [`Orchestrator::cancel`]
//! adds best-effort teardown of the job's worker, and
//! [`Orchestrator::launch`] provisions a worker for a queued job, failing
//! the job if the worker never starts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dossier_cloud::{DispatchError, WorkerDispatcher, WorkerHandle};
use dossier_core::error::CoreError;
use dossier_core::job::{Job, JobError, NewJob};
use dossier_jobs::JobManager;
use serde_json::json;
use tokio_util::task::TaskTracker;

/// Errors from launching a job on a worker.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Job(#[from] CoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Coordinates job state with worker lifecycle.
pub struct Orchestrator {
    manager: Arc<JobManager>,
    dispatcher: Arc<WorkerDispatcher>,
    launches: TaskTracker,
}

impl Orchestrator {
    pub fn new(manager: Arc<JobManager>, dispatcher: Arc<WorkerDispatcher>) -> Self {
        Self {
            manager,
            dispatcher,
            launches: TaskTracker::new(),
        }
    }

    /// Validate and create a job, then launch it in the background when
    /// workers are available.
    ///
    /// Without a dispatcher the job stays queued for an in-process runner.
    pub fn submit(self: &Arc<Self>, input: NewJob) -> Result<Job, CoreError> {
        if input.owner_slug.trim().is_empty() {
            return Err(CoreError::Validation("owner_slug must not be empty".into()));
        }
        if input.query.trim().is_empty() {
            return Err(CoreError::Validation("query must not be empty".into()));
        }

        let job = self.manager.create(input);

        if self.dispatcher.is_available() {
            let this = Arc::clone(self);
            let job_id = job.id.clone();
            self.launches.spawn(async move {
                if let Err(e) = this.launch(&job_id).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Background launch failed");
                }
            });
        } else {
            tracing::debug!(job_id = %job.id, "Dispatcher unavailable, job left queued");
        }

        Ok(job)
    }

    /// Provision a worker for `job_id` and wait for it to start.
    ///
    /// On success the worker is tracked and the job moves to running. On
    /// any dispatch failure the job is failed and a provisioned worker is
    /// reclaimed.
    pub async fn launch(&self, job_id: &str) -> Result<WorkerHandle, LaunchError> {
        let job = self.manager.get(job_id).await.ok_or_else(|| CoreError::NotFound {
            entity: "job",
            id: job_id.to_string(),
        })?;

        let handle = match self
            .dispatcher
            .create(job_id, &job.owner_slug, BTreeMap::new())
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.fail_job(job_id, "Failed to provision worker", &e);
                return Err(e.into());
            }
        };
        self.dispatcher.track(job_id, &handle.worker_id);

        let timeout = self.dispatcher.config().ready_timeout;
        let ready = match self.dispatcher.wait_until_ready(&handle.worker_id, timeout).await {
            Ok(ready) => ready,
            Err(e) => {
                self.fail_job(job_id, "Worker failed to start", &e);
                self.dispatcher.reclaim(job_id).await;
                return Err(e.into());
            }
        };

        self.manager.sender(job_id).trace(json!({
            "stage": "dispatch",
            "worker_id": ready.worker_id,
            "region": ready.region,
            "state": ready.state,
        }));

        if let Err(e) = self.manager.start(job_id) {
            // Cancelled while the worker was booting.
            tracing::info!(job_id = %job_id, error = %e, "Job no longer startable, reclaiming worker");
            self.dispatcher.reclaim(job_id).await;
            return Err(e.into());
        }

        Ok(ready)
    }

    /// Cancel a job and tear down its worker.
    ///
    /// Returns whether the job was cancelled. Worker teardown runs only
    /// for a successful cancel and never fails the call.
    pub async fn cancel(&self, job_id: &str) -> bool {
        if !self.manager.cancel(job_id) {
            return false;
        }
        if let Some(worker_id) = self.dispatcher.reclaim(job_id).await {
            tracing::info!(job_id = %job_id, worker_id = %worker_id, "Cancelled job's worker reclaimed");
        }
        true
    }

    /// Wait for background launches to settle, at most `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        self.launches.close();
        if tokio::time::timeout(timeout, self.launches.wait()).await.is_err() {
            tracing::warn!(pending = self.launches.len(), "Timed out waiting for launches");
        }
    }

    fn fail_job(&self, job_id: &str, context: &str, cause: &DispatchError) {
        let error = JobError::new(format!("{context}: {cause}"))
            .with_details(json!({ "kind": dispatch_error_kind(cause) }));
        if let Err(e) = self.manager.fail(job_id, error) {
            tracing::debug!(job_id = %job_id, error = %e, "Job not failed after dispatch error");
        }
    }
}

fn dispatch_error_kind(error: &DispatchError) -> &'static str {
    match error {
        DispatchError::Configuration(_) => "configuration",
        DispatchError::Provisioning(_) => "provisioning",
        DispatchError::Timeout { .. } => "timeout",
        DispatchError::TerminalState { .. } => "terminal_state",
    }
}

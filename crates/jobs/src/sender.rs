//! Send-function handed to pipeline stages.

use std::sync::Arc;

use dossier_core::job_events::EventKind;
use dossier_core::types::JobId;

use crate::manager::JobManager;

/// Routes a pipeline's events into one job.
///
/// Cheap to clone. Sending to a job that is no longer in memory is a no-op.
#[derive(Clone)]
pub struct JobSender {
    manager: Arc<JobManager>,
    job_id: JobId,
}

impl JobSender {
    pub(crate) fn new(manager: Arc<JobManager>, job_id: JobId) -> Self {
        Self { manager, job_id }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Record and broadcast one event.
    pub fn send(&self, kind: EventKind, payload: serde_json::Value) {
        self.manager.record_event(&self.job_id, kind, payload);
    }

    pub fn progress(&self, payload: serde_json::Value) {
        self.send(EventKind::Progress, payload);
    }

    pub fn trace(&self, payload: serde_json::Value) {
        self.send(EventKind::Trace, payload);
    }

    pub fn report(&self, report: serde_json::Value) {
        self.send(EventKind::Report, report);
    }

    /// Whether the job has been cancelled (or is gone). Long-running stages
    /// check this between steps.
    pub fn is_cancelled(&self) -> bool {
        self.manager.is_cancelled(&self.job_id)
    }
}

impl std::fmt::Debug for JobSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSender")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

//! Job to worker association.

use std::collections::HashMap;
use std::sync::Mutex;

use dossier_core::types::JobId;

/// Which worker is running which job.
///
/// Entries are removed only by [`untrack`](WorkerRegistry::untrack); a
/// worker that exits on its own stays registered until then.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Mutex<HashMap<JobId, String>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `worker_id` runs `job_id`, replacing any earlier worker.
    pub fn track(&self, job_id: &str, worker_id: &str) -> Option<String> {
        self.lock().insert(job_id.to_string(), worker_id.to_string())
    }

    pub fn get(&self, job_id: &str) -> Option<String> {
        self.lock().get(job_id).cloned()
    }

    /// Forget the worker for `job_id`, returning it.
    pub fn untrack(&self, job_id: &str) -> Option<String> {
        self.lock().remove(job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, String>> {
        self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

use std::sync::Arc;

use dossier_cloud::WorkerDispatcher;
use dossier_jobs::JobManager;

use crate::config::ControllerConfig;
use crate::orchestrator::Orchestrator;

/// Shared controller state handed to request handlers.
///
/// Cheaply cloneable (every field is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Controller configuration.
    pub config: Arc<ControllerConfig>,
    /// Owner of all job state.
    pub manager: Arc<JobManager>,
    /// Per-job worker provisioning.
    pub dispatcher: Arc<WorkerDispatcher>,
    /// Launch and cancel flows spanning both.
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(
        config: ControllerConfig,
        manager: Arc<JobManager>,
        dispatcher: Arc<WorkerDispatcher>,
    ) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&manager),
            Arc::clone(&dispatcher),
        ));
        Self {
            config: Arc::new(config),
            manager,
            dispatcher,
            orchestrator,
        }
    }
}

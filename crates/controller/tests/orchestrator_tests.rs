//! Integration tests for `Orchestrator` launch and cancel flows.
//!
//! Jobs live in a real `JobManager` over a temporary filesystem store; the
//! worker provider is scripted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::json;

use dossier_cloud::dispatcher::worker_name;
use dossier_cloud::{
    ComputeProvider, DispatchError, DispatcherConfig, MachineRequest, ProviderError,
    WorkerDispatcher, WorkerHandle, WorkerState,
};
use dossier_controller::orchestrator::{LaunchError, Orchestrator};
use dossier_core::error::CoreError;
use dossier_core::job::{JobStatus, NewJob, CANCELLED_MESSAGE};
use dossier_core::job_events::EventKind;
use dossier_jobs::JobManager;
use dossier_store::FileStore;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedProvider {
    states: Mutex<VecDeque<WorkerState>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(states: &[WorkerState]) -> Self {
        Self {
            states: Mutex::new(states.iter().copied().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn handle(state: WorkerState) -> WorkerHandle {
        WorkerHandle {
            worker_id: "m-1".to_string(),
            name: "acme-worker".to_string(),
            state,
            region: "iad".to_string(),
            created_at: None,
            instance_id: None,
            private_address: None,
        }
    }
}

#[async_trait]
impl ComputeProvider for ScriptedProvider {
    async fn create_machine(&self, request: &MachineRequest) -> Result<WorkerHandle, ProviderError> {
        self.calls.lock().unwrap().push(format!("create:{}", request.name));
        Ok(Self::handle(WorkerState::Created))
    }

    async fn get_machine(&self, _worker_id: &str) -> Result<WorkerHandle, ProviderError> {
        let mut states = self.states.lock().unwrap();
        let state = if states.len() > 1 {
            states.pop_front().unwrap_or(WorkerState::Unknown)
        } else {
            states.front().copied().unwrap_or(WorkerState::Unknown)
        };
        Ok(Self::handle(state))
    }

    async fn stop_machine(&self, worker_id: &str) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push(format!("stop:{worker_id}"));
        Ok(())
    }

    async fn destroy_machine(&self, worker_id: &str) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push(format!("destroy:{worker_id}"));
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    manager: Arc<JobManager>,
    dispatcher: Arc<WorkerDispatcher>,
    provider: Arc<ScriptedProvider>,
    orchestrator: Arc<Orchestrator>,
}

async fn harness(token: Option<&str>, states: &[WorkerState]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).await.unwrap());
    let manager = Arc::new(JobManager::new(store));

    let token = token.map(str::to_string);
    let config = DispatcherConfig::from_lookup(move |key| match key {
        "FLY_API_TOKEN" => token.clone(),
        "WORKER_READY_TIMEOUT_SECS" => Some("10".to_string()),
        _ => None,
    });
    let provider = Arc::new(ScriptedProvider::new(states));
    let dispatcher = Arc::new(WorkerDispatcher::with_provider(config, provider.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&manager),
        Arc::clone(&dispatcher),
    ));

    Harness {
        _dir: dir,
        manager,
        dispatcher,
        provider,
        orchestrator,
    }
}

fn new_job() -> NewJob {
    NewJob {
        owner_slug: "acme".to_string(),
        query: "Initiate coverage on Acme".to_string(),
        configuration_level: "standard".to_string(),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Test: launch() success path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn launch_tracks_worker_and_starts_job() {
    let h = harness(
        Some("fo1_test"),
        &[WorkerState::Created, WorkerState::Starting, WorkerState::Started],
    )
    .await;
    let job = h.manager.create(new_job());
    let mut sub = h.manager.subscribe(&job.id);

    let ready = h.orchestrator.launch(&job.id).await.unwrap();

    assert_eq!(ready.state, WorkerState::Started);
    assert_eq!(h.dispatcher.get(&job.id).as_deref(), Some("m-1"));

    let job = h.manager.get_in_memory(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.trace_log.len(), 1);
    assert_eq!(job.trace_log[0]["worker_id"], "m-1");
    assert_eq!(job.trace_log[0]["state"], "started");

    assert_eq!(sub.recv().await.unwrap().kind, EventKind::Trace);
    assert_eq!(sub.recv().await.unwrap().kind, EventKind::JobStatus);
}

// ---------------------------------------------------------------------------
// Test: launch() failure paths fail the job
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn launch_with_failed_worker_fails_job_and_reclaims() {
    let h = harness(Some("fo1_test"), &[WorkerState::Starting, WorkerState::Failed]).await;
    let job = h.manager.create(new_job());

    let result = h.orchestrator.launch(&job.id).await;

    assert_matches!(
        result,
        Err(LaunchError::Dispatch(DispatchError::TerminalState { .. }))
    );
    let job = h.manager.get_in_memory(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.message().starts_with("Worker failed to start"));
    assert_eq!(error.details(), Some(&json!({"kind": "terminal_state"})));
    assert_eq!(h.dispatcher.get(&job.id), None);
    assert_eq!(
        h.provider.calls(),
        vec![
            format!("create:{}", worker_name("acme", &job.id)),
            "stop:m-1".to_string(),
            "destroy:m-1".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn launch_timeout_fails_job() {
    let h = harness(Some("fo1_test"), &[WorkerState::Created]).await;
    let job = h.manager.create(new_job());

    let result = h.orchestrator.launch(&job.id).await;

    assert_matches!(result, Err(LaunchError::Dispatch(DispatchError::Timeout { .. })));
    let job = h.manager.get_in_memory(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().details(), Some(&json!({"kind": "timeout"})));
}

#[tokio::test]
async fn launch_without_credential_fails_job_without_provider_calls() {
    let h = harness(None, &[]).await;
    let job = h.manager.create(new_job());

    let result = h.orchestrator.launch(&job.id).await;

    assert_matches!(
        result,
        Err(LaunchError::Dispatch(DispatchError::Configuration(_)))
    );
    assert!(h.provider.calls().is_empty());
    let job = h.manager.get_in_memory(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().message().contains("FLY_API_TOKEN"));
}

#[tokio::test]
async fn launch_unknown_job_is_not_found() {
    let h = harness(Some("fo1_test"), &[WorkerState::Started]).await;

    assert_matches!(
        h.orchestrator.launch("job_missing").await,
        Err(LaunchError::Job(CoreError::NotFound { .. }))
    );
    assert!(h.provider.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Test: cancel() composes status flip with worker teardown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_running_job_reclaims_its_worker() {
    let h = harness(Some("fo1_test"), &[WorkerState::Started]).await;
    let job = h.manager.create(new_job());
    h.orchestrator.launch(&job.id).await.unwrap();

    assert!(h.orchestrator.cancel(&job.id).await);

    let cancelled = h.manager.get_in_memory(&job.id).unwrap();
    assert_eq!(cancelled.error.unwrap().message(), CANCELLED_MESSAGE);
    assert!(h.manager.is_cancelled(&job.id));
    assert_eq!(h.dispatcher.get(&job.id), None);

    let calls = h.provider.calls();
    assert_eq!(&calls[1..], &["stop:m-1".to_string(), "destroy:m-1".to_string()]);
}

#[tokio::test]
async fn cancel_unknown_job_touches_no_worker() {
    let h = harness(Some("fo1_test"), &[]).await;
    h.dispatcher.track("job_missing", "m-9");

    assert!(!h.orchestrator.cancel("job_missing").await);
    assert!(h.provider.calls().is_empty());
    assert_eq!(h.dispatcher.get("job_missing").as_deref(), Some("m-9"));
}

// ---------------------------------------------------------------------------
// Test: submit()
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_rejects_blank_input() {
    let h = harness(None, &[]).await;

    let mut blank_query = new_job();
    blank_query.query = "  ".to_string();
    assert_matches!(h.orchestrator.submit(blank_query), Err(CoreError::Validation(_)));

    let mut blank_slug = new_job();
    blank_slug.owner_slug = String::new();
    assert_matches!(h.orchestrator.submit(blank_slug), Err(CoreError::Validation(_)));

    assert!(h.manager.is_empty());
}

#[tokio::test]
async fn submit_without_dispatcher_leaves_job_queued() {
    let h = harness(None, &[]).await;

    let job = h.orchestrator.submit(new_job()).unwrap();
    h.orchestrator.shutdown(Duration::from_secs(1)).await;

    assert_eq!(h.manager.get_in_memory(&job.id).unwrap().status, JobStatus::Queued);
    assert!(h.provider.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn submit_with_dispatcher_launches_in_background() {
    let h = harness(Some("fo1_test"), &[WorkerState::Started]).await;

    let job = h.orchestrator.submit(new_job()).unwrap();
    h.orchestrator.shutdown(Duration::from_secs(30)).await;

    assert_eq!(h.manager.get_in_memory(&job.id).unwrap().status, JobStatus::Running);
    assert_eq!(h.dispatcher.get(&job.id).as_deref(), Some("m-1"));
}

//! In-memory job table with durable write-behind. Within one controller
//! process this table is the source of truth for job state.
//!
//! [`JobManager`] owns every job record and every job's [`JobChannel`].
//! All mutation goes through its synchronous methods, which hold the table
//! lock only for non-awaiting critical sections and publish events while
//! holding it, so each job's subscribers see events in send order.
//!
//! Every mutation queues a full snapshot for the [`StateStore`]. Each job has
//! at most one writer task in flight on a [`TaskTracker`]; it drains the
//! job's latest queued snapshot until none is left, so a job's durable copy
//! never goes back to an older state. Write failures are logged and never
//! surface to the caller; the in-memory record stays authoritative for this
//! process.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use dossier_core::error::CoreError;
use dossier_core::job::{Job, JobError, JobStatus, JobSummary, JobUpdate, NewJob};
use dossier_core::job_events::EventKind;
use dossier_core::types::{JobId, Timestamp};
use dossier_events::{JobChannel, JobEvent, Subscription};
use dossier_store::{job_key, StateStore};
use serde_json::json;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;

use crate::sender::JobSender;

/// Default upper bound on how long [`JobManager::shutdown`] waits for
/// in-flight writes.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Jobs and their channels, guarded together.
#[derive(Default)]
struct JobTable {
    jobs: HashMap<JobId, Job>,
    channels: HashMap<JobId, JobChannel>,
}

impl JobTable {
    /// Clone a job with its live listener count filled in.
    fn snapshot(&self, job: &Job) -> Job {
        let mut out = job.clone();
        out.listener_count = self.listener_count(&job.id);
        out
    }

    fn listener_count(&self, id: &str) -> usize {
        self.channels
            .get(id)
            .map(JobChannel::listener_count)
            .unwrap_or(0)
    }

    fn publish(&self, id: &str, kind: EventKind, payload: serde_json::Value) {
        if let Some(channel) = self.channels.get(id) {
            channel.publish(JobEvent::new(id, kind, payload));
        }
    }
}

// ---------------------------------------------------------------------------
// Write-behind queue
// ---------------------------------------------------------------------------

/// Latest unwritten snapshot per job, plus the jobs with a writer running.
#[derive(Default)]
struct WriteQueue {
    pending: HashMap<JobId, serde_json::Value>,
    writing: HashSet<JobId>,
}

struct WriteBehind {
    queue: Mutex<WriteQueue>,
    /// Number of writer tasks still running.
    active: watch::Sender<usize>,
}

impl WriteBehind {
    fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            queue: Mutex::new(WriteQueue::default()),
            active,
        }
    }

    fn lock(&self) -> MutexGuard<'_, WriteQueue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue `value` as the job's next snapshot. Returns `true` when the
    /// caller must start a writer for the job.
    fn enqueue(&self, job_id: &str, value: serde_json::Value) -> bool {
        let mut queue = self.lock();
        queue.pending.insert(job_id.to_string(), value);
        if queue.writing.insert(job_id.to_string()) {
            self.active.send_modify(|n| *n += 1);
            true
        } else {
            false
        }
    }

    /// Take the job's next snapshot, or retire its writer when none is left.
    fn next(&self, job_id: &str) -> Option<serde_json::Value> {
        let mut queue = self.lock();
        let value = queue.pending.remove(job_id);
        if value.is_none() {
            queue.writing.remove(job_id);
            self.active.send_modify(|n| *n = n.saturating_sub(1));
        }
        value
    }

    async fn drain(&self, store: &dyn StateStore, job_id: &str) {
        let key = job_key(job_id);
        while let Some(value) = self.next(job_id) {
            if let Err(e) = store.put(&key, &value).await {
                tracing::warn!(
                    job_id = %job_id,
                    backend = store.backend_name(),
                    error = %e,
                    "Failed to persist job snapshot",
                );
            }
        }
    }

    async fn idle(&self) {
        let mut active = self.active.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = active.wait_for(|n| *n == 0).await;
    }

    fn in_flight(&self) -> usize {
        *self.active.borrow()
    }
}

// ---------------------------------------------------------------------------
// JobManager
// ---------------------------------------------------------------------------

/// Owner of job state, event fan-out, and status transitions.
///
/// Construct once at startup and share as `Arc<JobManager>`. Methods that
/// persist must run inside a Tokio runtime.
pub struct JobManager {
    table: Mutex<JobTable>,
    store: Arc<dyn StateStore>,
    pending: Arc<WriteBehind>,
    writes: TaskTracker,
}

impl JobManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            table: Mutex::new(JobTable::default()),
            store,
            pending: Arc::new(WriteBehind::new()),
            writes: TaskTracker::new(),
        }
    }

    // ---- creation and lookup ----

    /// Create a queued job and schedule its first durable write.
    pub fn create(&self, input: NewJob) -> Job {
        let job = Job::new(input);

        let snapshot = {
            let mut table = self.lock();
            // Reuse a channel opened by an early subscriber.
            table.channels.entry(job.id.clone()).or_default();
            let snapshot = table.snapshot(&job);
            table.jobs.insert(job.id.clone(), job);
            self.persist(&snapshot);
            snapshot
        };

        tracing::info!(
            job_id = %snapshot.id,
            slug = %snapshot.owner_slug,
            "Job created",
        );
        snapshot
    }

    /// Look a job up in memory, falling back to the durable store.
    ///
    /// A job found only in the store is rehydrated into memory with a fresh
    /// channel (subscribers never survive a process boundary). Store errors
    /// are logged and reported as a miss.
    pub async fn get(&self, id: &str) -> Option<Job> {
        if let Some(job) = self.get_in_memory(id) {
            return Some(job);
        }

        let value = match self.store.get(&job_key(id)).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Failed to read job snapshot");
                return None;
            }
        };

        let job: Job = match serde_json::from_value(value) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Stored job snapshot is unreadable");
                return None;
            }
        };

        let mut table = self.lock();
        table.channels.entry(job.id.clone()).or_default();
        // Another caller may have rehydrated or created it meanwhile.
        let job = table.jobs.entry(job.id.clone()).or_insert(job).clone();
        tracing::debug!(job_id = %id, "Job rehydrated from state store");
        Some(table.snapshot(&job))
    }

    /// Look a job up in memory only.
    pub fn get_in_memory(&self, id: &str) -> Option<Job> {
        let table = self.lock();
        table.jobs.get(id).map(|job| table.snapshot(job))
    }

    /// A job for `slug`: the newest unfinished one if any, otherwise the
    /// newest overall.
    pub fn get_by_slug(&self, slug: &str) -> Option<Job> {
        let table = self.lock();
        let mut latest: Option<&Job> = None;
        let mut latest_unfinished: Option<&Job> = None;

        for job in table.jobs.values().filter(|job| job.owner_slug == slug) {
            if latest.map_or(true, |l| job.created_at > l.created_at) {
                latest = Some(job);
            }
            if !job.is_terminal() && latest_unfinished.map_or(true, |l| job.created_at > l.created_at)
            {
                latest_unfinished = Some(job);
            }
        }

        latest_unfinished.or(latest).map(|job| table.snapshot(job))
    }

    /// The job for `slug` with the greatest `created_at`.
    pub fn get_latest_by_slug(&self, slug: &str) -> Option<Job> {
        let table = self.lock();
        table
            .jobs
            .values()
            .filter(|job| job.owner_slug == slug)
            .max_by_key(|job| job.created_at)
            .map(|job| table.snapshot(job))
    }

    /// Summaries of every in-memory job, newest first.
    pub fn list(&self) -> Vec<JobSummary> {
        let table = self.lock();
        let mut summaries: Vec<JobSummary> = table.jobs.values().map(Job::summary).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Summaries of the in-memory jobs for `slug`, newest first.
    pub fn history_for_slug(&self, slug: &str) -> Vec<JobSummary> {
        let mut summaries = self.list();
        summaries.retain(|summary| summary.owner_slug == slug);
        summaries
    }

    /// Listing projection of a job.
    pub fn summarize(job: &Job) -> JobSummary {
        job.summary()
    }

    // ---- mutation ----

    /// Merge `update` into the job and schedule a durable write.
    ///
    /// Returns `None` if the job is not in memory.
    pub fn update(&self, id: &str, update: JobUpdate) -> Option<Job> {
        let snapshot = {
            let mut table = self.lock();
            let job = table.jobs.get_mut(id)?;
            job.apply_update(update);
            let job = job.clone();
            let snapshot = table.snapshot(&job);
            self.persist(&snapshot);
            snapshot
        };

        Some(snapshot)
    }

    /// The send-function handed to pipeline stages for job `id`.
    pub fn sender(self: &Arc<Self>, id: impl Into<JobId>) -> JobSender {
        JobSender::new(Arc::clone(self), id.into())
    }

    /// Route one pipeline event into the job and broadcast it.
    ///
    /// No-op when the job is not in memory.
    pub(crate) fn record_event(&self, id: &str, kind: EventKind, payload: serde_json::Value) {
        let mut table = self.lock();
        let Some(job) = table.jobs.get_mut(id) else {
            tracing::debug!(job_id = %id, kind = %kind, "Dropping event for unknown job");
            return;
        };

        match kind {
            EventKind::Progress => job.progress_log.push(payload.clone()),
            EventKind::Trace => job.trace_log.push(payload.clone()),
            EventKind::Report => job.current_report = Some(payload.clone()),
            EventKind::Error => job.error = Some(JobError::from_payload(&payload)),
            EventKind::JobStatus | EventKind::Done => {}
        }
        job.touch();

        let job = job.clone();
        table.publish(id, kind, payload);
        self.persist(&table.snapshot(&job));
    }

    /// Attach a listener to job `id`.
    ///
    /// The channel is created if the job is not in memory yet, so a
    /// subscription made before `create` still sees the job's events.
    pub fn subscribe(&self, id: &str) -> Subscription {
        let mut table = self.lock();
        let subscription = table.channels.entry(id.to_string()).or_default().subscribe();
        tracing::debug!(
            job_id = %id,
            listeners = table.listener_count(id),
            "Listener subscribed",
        );
        subscription
    }

    /// Live listener count for job `id`.
    pub fn listener_count(&self, id: &str) -> usize {
        self.lock().listener_count(id)
    }

    // ---- transitions ----

    /// queued -> running.
    pub fn start(&self, id: &str) -> Result<Job, CoreError> {
        self.transition(id, JobStatus::Running, |_| None)
    }

    /// running -> completed, recording the final report.
    pub fn complete(&self, id: &str, report: serde_json::Value) -> Result<Job, CoreError> {
        self.transition(id, JobStatus::Completed, |job| {
            job.current_report = Some(report.clone());
            Some((EventKind::Done, json!({ "report": report })))
        })
    }

    /// queued/running -> failed, recording `error`.
    pub fn fail(&self, id: &str, error: JobError) -> Result<Job, CoreError> {
        self.transition(id, JobStatus::Failed, |job| {
            let payload = json!({ "message": error.message(), "details": error.details() });
            job.error = Some(error);
            Some((EventKind::Error, payload))
        })
    }

    /// Cancel a queued or running job.
    ///
    /// Marks it failed with the cancellation sentinel. Returns `false`, with
    /// the job untouched, for unknown ids and any other status. Workers are
    /// not stopped here.
    pub fn cancel(&self, id: &str) -> bool {
        match self.fail(id, JobError::cancelled()) {
            Ok(_) => {
                tracing::info!(job_id = %id, "Job cancelled");
                true
            }
            Err(_) => false,
        }
    }

    /// Whether job `id` was cancelled. Unknown ids count as cancelled so
    /// that orphaned pipelines stop.
    pub fn is_cancelled(&self, id: &str) -> bool {
        self.lock()
            .jobs
            .get(id)
            .map(Job::is_cancelled)
            .unwrap_or(true)
    }

    fn transition<F>(&self, id: &str, next: JobStatus, apply: F) -> Result<Job, CoreError>
    where
        F: FnOnce(&mut Job) -> Option<(EventKind, serde_json::Value)>,
    {
        let snapshot = {
            let mut table = self.lock();
            let job = table.jobs.get_mut(id).ok_or_else(|| CoreError::NotFound {
                entity: "job",
                id: id.to_string(),
            })?;

            let previous = job.status;
            job.transition(next)?;
            let terminal_event = apply(job);
            let job = job.clone();

            table.publish(
                id,
                EventKind::JobStatus,
                json!({ "status": next, "previous": previous }),
            );
            if let Some((kind, payload)) = terminal_event {
                table.publish(id, kind, payload);
            }

            tracing::info!(job_id = %id, from = %previous, to = %next, "Job status changed");
            let snapshot = table.snapshot(&job);
            self.persist(&snapshot);
            snapshot
        };

        Ok(snapshot)
    }

    // ---- maintenance ----

    /// Evict terminal, listener-free jobs not updated within `max_age`.
    ///
    /// Durable copies stay retrievable through [`get`](Self::get).
    pub fn sweep(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        self.sweep_updated_before(cutoff)
    }

    /// Evict terminal, listener-free jobs whose `updated_at` is before
    /// `cutoff`. Returns the number evicted.
    pub fn sweep_updated_before(&self, cutoff: Timestamp) -> usize {
        let mut table = self.lock();

        let evict: Vec<JobId> = table
            .jobs
            .values()
            .filter(|job| {
                job.is_terminal()
                    && job.updated_at < cutoff
                    && table.listener_count(&job.id) == 0
            })
            .map(|job| job.id.clone())
            .collect();

        for id in &evict {
            table.jobs.remove(id);
            table.channels.remove(id);
        }

        // Channels opened by subscribers to ids that never became jobs.
        let JobTable { jobs, channels } = &mut *table;
        let before = channels.len();
        channels.retain(|id, channel| jobs.contains_key(id) || channel.listener_count() > 0);
        let orphans = before - channels.len();

        if !evict.is_empty() || orphans > 0 {
            tracing::info!(
                evicted = evict.len(),
                orphan_channels = orphans,
                remaining = table.jobs.len(),
                "Swept jobs",
            );
        }
        evict.len()
    }

    /// Number of jobs held in memory.
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of open job channels, including ones opened by early
    /// subscribers.
    pub fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    /// Wait until every queued snapshot has been written.
    ///
    /// Safe to call from several tasks at once.
    pub async fn flush(&self) {
        self.pending.idle().await;
    }

    /// Drain in-flight writes (waiting at most `timeout`) and detach every
    /// listener.
    pub async fn shutdown(&self, timeout: Duration) {
        let pending = self.pending.in_flight();
        tracing::info!(pending_writes = pending, "Shutting down job manager");

        self.writes.close();
        if tokio::time::timeout(timeout, self.writes.wait()).await.is_err() {
            tracing::warn!(
                pending_writes = self.pending.in_flight(),
                "Timed out waiting for job snapshot writes",
            );
        }

        let detached = {
            let mut table = self.lock();
            let count = table.channels.len();
            table.channels.clear();
            count
        };
        tracing::info!(channels = detached, "Job manager shut down");
    }

    // ---- private helpers ----

    fn lock(&self) -> MutexGuard<'_, JobTable> {
        // A panic while holding the lock cannot leave a half-applied
        // mutation visible: every critical section edits one job in place.
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a snapshot write. Called with the table lock held so that
    /// snapshots of one job are queued in mutation order.
    fn persist(&self, job: &Job) {
        let value = match serde_json::to_value(job) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to encode job snapshot");
                return;
            }
        };

        if !self.pending.enqueue(&job.id, value) {
            return;
        }

        let pending = Arc::clone(&self.pending);
        let store = Arc::clone(&self.store);
        let job_id = job.id.clone();
        self.writes.spawn(async move {
            pending.drain(store.as_ref(), &job_id).await;
        });
    }
}

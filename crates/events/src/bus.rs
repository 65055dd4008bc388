//! Per-job event channel backed by a `tokio::sync::broadcast` channel.
//!
//! Every job owns one [`JobChannel`]. Pipeline stages and the lifecycle
//! manager publish [`JobEvent`]s on it; streaming handlers hold a
//! [`Subscription`]. The channel's live receiver count is the job's
//! listener count, so dropping a subscription is all it takes to
//! unsubscribe.

use chrono::{DateTime, Utc};
use dossier_core::job_events::EventKind;
use dossier_core::types::JobId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// One event on a job's channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Job the event belongs to.
    pub job_id: JobId,

    /// What happened.
    pub kind: EventKind,

    /// Free-form JSON payload carrying kind-specific data.
    pub payload: serde_json::Value,

    /// When the event was published (UTC).
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_id: impl Into<JobId>, kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// JobChannel
// ---------------------------------------------------------------------------

/// Default buffer capacity per job.
///
/// A subscriber that falls further behind than this loses the oldest
/// events and logs the gap.
pub const DEFAULT_CAPACITY: usize = 256;

/// Fan-out channel for a single job.
pub struct JobChannel {
    sender: broadcast::Sender<JobEvent>,
}

impl JobChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no subscribers the event is dropped; the job's logs are the
    /// replay source.
    pub fn publish(&self, event: JobEvent) {
        // SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Attach a new subscriber. It sees only events published from now on.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live subscription to one job's events.
///
/// Dropping it (or calling [`unsubscribe`](Subscription::unsubscribe))
/// detaches the listener and decrements the job's listener count.
pub struct Subscription {
    receiver: broadcast::Receiver<JobEvent>,
}

impl Subscription {
    /// Wait for the next event.
    ///
    /// Returns `None` once the channel has been released (job evicted or
    /// manager shut down).
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Job subscriber lagged, events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Job subscriber lagged, events were dropped");
                }
                Err(_) => return None,
            }
        }
    }

    /// Detach from the job's channel.
    pub fn unsubscribe(self) {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

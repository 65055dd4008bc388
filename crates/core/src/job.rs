//! Report-generation job record and its state machine.
//!
//! A [`Job`] is created `queued`, advances to `running` when a worker picks
//! it up, and ends `completed` or `failed`. Nothing leaves a terminal state.
//! The record is serialized whole as the durable snapshot; the in-memory
//! listener count is excluded from every snapshot.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

/// Error message recorded when a user cancels a job.
pub const CANCELLED_MESSAGE: &str = "Job cancelled by user";

/// Fallback message for failure payloads that carry no text.
const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

/// Length of the random suffix in generated job ids.
const ID_SUFFIX_LEN: usize = 8;

/// Characters used for the random id suffix.
const ID_SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether the status is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal edge.
    ///
    /// Legal edges: queued -> running, running -> completed,
    /// running -> failed, queued -> failed.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Queued, Self::Failed)
        )
    }

    /// Validate a transition, returning a [`CoreError::Conflict`] for
    /// illegal edges.
    pub fn validate_transition(self, next: JobStatus) -> Result<(), CoreError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Cannot transition job from '{}' to '{}'",
                self.as_str(),
                next.as_str()
            )))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Error payload
// ---------------------------------------------------------------------------

/// Failure recorded on a job. The message is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    #[serde(deserialize_with = "non_empty_message")]
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            UNKNOWN_ERROR_MESSAGE.to_string()
        } else {
            message
        };
        Self {
            message,
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&serde_json::Value> {
        self.details.as_ref()
    }

    /// Interpret an `error` event payload.
    ///
    /// Strings become the message. Objects contribute their `message` (or
    /// `error`) string field and are kept whole as details. Anything else is
    /// rendered as JSON text.
    pub fn from_payload(payload: &serde_json::Value) -> Self {
        match payload {
            serde_json::Value::String(s) => Self::new(s.clone()),
            serde_json::Value::Object(map) => {
                let message = map
                    .get("message")
                    .or_else(|| map.get("error"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                Self::new(message).with_details(payload.clone())
            }
            serde_json::Value::Null => Self::new(""),
            other => Self::new(other.to_string()),
        }
    }

    /// The sentinel error recorded by a user cancellation.
    pub fn cancelled() -> Self {
        Self::new(CANCELLED_MESSAGE)
    }

    pub fn is_cancellation(&self) -> bool {
        self.message == CANCELLED_MESSAGE
    }
}

fn non_empty_message<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let message = String::deserialize(deserializer)?;
    Ok(JobError::new(message).message)
}

// ---------------------------------------------------------------------------
// Work log
// ---------------------------------------------------------------------------

/// Structured audit trail of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkLog {
    #[serde(default)]
    pub plan_steps: Vec<serde_json::Value>,
    #[serde(default)]
    pub invocations: Vec<serde_json::Value>,
    #[serde(default)]
    pub reasoning_notes: Vec<serde_json::Value>,
}

/// Partial work-log update. Present fields replace the stored field whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkLogPatch {
    pub plan_steps: Option<Vec<serde_json::Value>>,
    pub invocations: Option<Vec<serde_json::Value>>,
    pub reasoning_notes: Option<Vec<serde_json::Value>>,
}

impl WorkLog {
    fn apply(&mut self, patch: WorkLogPatch) {
        if let Some(plan_steps) = patch.plan_steps {
            self.plan_steps = plan_steps;
        }
        if let Some(invocations) = patch.invocations {
            self.invocations = invocations;
        }
        if let Some(reasoning_notes) = patch.reasoning_notes {
            self.reasoning_notes = reasoning_notes;
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Input for creating a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    pub owner_slug: String,
    pub query: String,
    pub configuration_level: String,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    #[serde(default)]
    pub conversation_context: Option<serde_json::Value>,
}

/// One report-generation request and its accumulated state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner_slug: String,
    pub status: JobStatus,

    pub query: String,
    pub configuration_level: String,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    #[serde(default)]
    pub conversation_context: Option<serde_json::Value>,

    #[serde(default)]
    pub progress_log: Vec<serde_json::Value>,
    #[serde(default)]
    pub trace_log: Vec<serde_json::Value>,
    #[serde(default)]
    pub work_log: WorkLog,

    #[serde(default)]
    pub current_report: Option<serde_json::Value>,
    #[serde(default)]
    pub domain_profile: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JobError>,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,

    /// Live subscriptions in this process. Never persisted.
    #[serde(skip)]
    pub listener_count: usize,
}

impl Job {
    /// Build a freshly queued job with a new id.
    pub fn new(input: NewJob) -> Self {
        let now = Utc::now();
        Self {
            id: generate_job_id(),
            owner_slug: input.owner_slug,
            status: JobStatus::Queued,
            query: input.query,
            configuration_level: input.configuration_level,
            attachments: input.attachments,
            conversation_context: input.conversation_context,
            progress_log: Vec::new(),
            trace_log: Vec::new(),
            work_log: WorkLog::default(),
            current_report: None,
            domain_profile: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            listener_count: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the job was failed by a user cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.status == JobStatus::Failed
            && self.error.as_ref().is_some_and(JobError::is_cancellation)
    }

    /// Merge a partial update and bump `updated_at`.
    pub fn apply_update(&mut self, update: JobUpdate) {
        if let Some(report) = update.current_report {
            self.current_report = Some(report);
        }
        if let Some(profile) = update.domain_profile {
            self.domain_profile = Some(profile);
        }
        if let Some(patch) = update.work_log {
            self.work_log.apply(patch);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.touch();
    }

    /// Move to `next`, stamping `completed_at` on terminal statuses.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), CoreError> {
        self.status.validate_transition(next)?;
        self.status = next;
        self.touch();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// `percent` of the most recent progress entry that carries one.
    pub fn latest_progress_percent(&self) -> Option<f64> {
        self.progress_log
            .iter()
            .rev()
            .find_map(|entry| entry.get("percent").and_then(|p| p.as_f64()))
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            owner_slug: self.owner_slug.clone(),
            status: self.status,
            query: self.query.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            progress_percent: self.latest_progress_percent(),
            attachment_count: self.attachments.len(),
            has_report: self.current_report.is_some(),
        }
    }
}

/// Partial job update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub current_report: Option<serde_json::Value>,
    pub domain_profile: Option<serde_json::Value>,
    pub work_log: Option<WorkLogPatch>,
    pub error: Option<JobError>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_report(mut self, report: serde_json::Value) -> Self {
        self.current_report = Some(report);
        self
    }

    pub fn with_domain_profile(mut self, profile: serde_json::Value) -> Self {
        self.domain_profile = Some(profile);
        self
    }

    pub fn with_work_log(mut self, patch: WorkLogPatch) -> Self {
        self.work_log = Some(patch);
        self
    }

    pub fn with_error(mut self, error: JobError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Lightweight projection for listings. Omits the logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub owner_slug: String,
    pub status: JobStatus,
    pub query: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub progress_percent: Option<f64>,
    pub attachment_count: usize,
    pub has_report: bool,
}

/// Generate a job id: `job_<unix-millis>_<random suffix>`.
///
/// The random suffix keeps ids created in the same millisecond distinct.
pub fn generate_job_id() -> JobId {
    let mut rng = rand::rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ID_SUFFIX_CHARSET.len());
            ID_SUFFIX_CHARSET[idx] as char
        })
        .collect();
    format!("job_{}_{suffix}", Utc::now().timestamp_millis())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

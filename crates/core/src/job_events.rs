//! Event kinds carried on a job's channel.
//!
//! Pipeline stages emit the first four kinds through a job's send-function;
//! the lifecycle manager emits the rest when the job changes status.

use serde::{Deserialize, Serialize};

/// Stage progress (percentage + message). Appended to `progress_log`.
pub const MSG_TYPE_PROGRESS: &str = "progress";

/// Diagnostic trace entry. Appended to `trace_log`.
pub const MSG_TYPE_TRACE: &str = "trace";

/// Latest report snapshot. Replaces `current_report`.
pub const MSG_TYPE_REPORT: &str = "report";

/// Failure payload. Replaces `error`.
pub const MSG_TYPE_ERROR: &str = "error";

/// Job status changed.
pub const MSG_TYPE_JOB_STATUS: &str = "job_status";

/// Job completed; payload carries the final report.
pub const MSG_TYPE_DONE: &str = "done";

/// Kind of a job event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Progress,
    Trace,
    Report,
    Error,
    JobStatus,
    Done,
}

impl EventKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Progress => MSG_TYPE_PROGRESS,
            Self::Trace => MSG_TYPE_TRACE,
            Self::Report => MSG_TYPE_REPORT,
            Self::Error => MSG_TYPE_ERROR,
            Self::JobStatus => MSG_TYPE_JOB_STATUS,
            Self::Done => MSG_TYPE_DONE,
        }
    }

    /// Parse a wire name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            MSG_TYPE_PROGRESS => Some(Self::Progress),
            MSG_TYPE_TRACE => Some(Self::Trace),
            MSG_TYPE_REPORT => Some(Self::Report),
            MSG_TYPE_ERROR => Some(Self::Error),
            MSG_TYPE_JOB_STATUS => Some(Self::JobStatus),
            MSG_TYPE_DONE => Some(Self::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

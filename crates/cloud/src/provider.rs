//! Provisioning API contract and the worker types it speaks in.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dossier_core::types::Timestamp;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Worker state
// ---------------------------------------------------------------------------

/// Lifecycle state reported by the provider for one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
    Suspended,
    Replacing,
    Destroying,
    Destroyed,
    Failed,
    /// Any state this client does not know about.
    #[serde(other)]
    Unknown,
}

impl WorkerState {
    /// The worker is running and can take work.
    pub fn is_ready(self) -> bool {
        self == Self::Started
    }

    /// The worker will never become ready.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Destroyed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Suspended => "suspended",
            Self::Replacing => "replacing",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Handles and requests
// ---------------------------------------------------------------------------

/// What the provider reports about one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHandle {
    pub worker_id: String,
    pub name: String,
    pub state: WorkerState,
    pub region: String,
    pub created_at: Option<Timestamp>,
    pub instance_id: Option<String>,
    pub private_address: Option<String>,
}

/// Guest resources for a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestSpec {
    pub cpu_kind: String,
    pub cpus: u32,
    pub memory_mb: u32,
}

/// Everything needed to provision one single-shot worker.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineRequest {
    pub name: String,
    pub region: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub guest: GuestSpec,
}

// ---------------------------------------------------------------------------
// Provider contract
// ---------------------------------------------------------------------------

/// Errors from a provisioning API.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider returned a non-2xx status code.
    #[error("Provider API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// A remote compute provisioning API.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Provision and boot a worker. Workers destroy themselves on exit and
    /// are never restarted.
    async fn create_machine(&self, request: &MachineRequest) -> Result<WorkerHandle, ProviderError>;

    /// Fetch a worker's current status.
    async fn get_machine(&self, worker_id: &str) -> Result<WorkerHandle, ProviderError>;

    /// Ask a worker to stop.
    async fn stop_machine(&self, worker_id: &str) -> Result<(), ProviderError>;

    /// Destroy a worker, stopping it first if needed.
    async fn destroy_machine(&self, worker_id: &str) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognised_state_deserializes_as_unknown() {
        let state: WorkerState = serde_json::from_str("\"hibernating\"").unwrap();
        assert_eq!(state, WorkerState::Unknown);
    }

    #[test]
    fn known_states_round_trip_through_their_names() {
        for state in [
            WorkerState::Created,
            WorkerState::Started,
            WorkerState::Destroyed,
            WorkerState::Failed,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }

    #[test]
    fn readiness_and_terminal_classification() {
        assert!(WorkerState::Started.is_ready());
        assert!(!WorkerState::Starting.is_ready());
        assert!(WorkerState::Failed.is_terminal());
        assert!(WorkerState::Destroyed.is_terminal());
        assert!(!WorkerState::Stopped.is_terminal());
        assert!(!WorkerState::Unknown.is_terminal());
    }
}

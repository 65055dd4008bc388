//! REST client for the Fly Machines API.
//!
//! Implements [`ComputeProvider`] over `https://api.machines.dev/v1` using
//! [`reqwest`] with bearer-token auth. Every worker is created with
//! `auto_destroy` and restart policy `no`, so it runs one job and goes away.

use async_trait::async_trait;
use dossier_core::types::Timestamp;
use serde::Deserialize;

use crate::config::DispatcherConfig;
use crate::provider::{ComputeProvider, MachineRequest, ProviderError, WorkerHandle, WorkerState};

/// HTTP client for one Fly app's machines.
pub struct FlyMachinesProvider {
    client: reqwest::Client,
    api_url: String,
    app_name: String,
    token: String,
}

/// Machine object as returned by the Machines API. Only the fields the
/// dispatcher reads are modelled.
#[derive(Debug, Deserialize)]
struct FlyMachine {
    id: String,
    #[serde(default)]
    name: String,
    state: WorkerState,
    #[serde(default)]
    region: String,
    instance_id: Option<String>,
    private_ip: Option<String>,
    created_at: Option<Timestamp>,
}

impl From<FlyMachine> for WorkerHandle {
    fn from(machine: FlyMachine) -> Self {
        Self {
            worker_id: machine.id,
            name: machine.name,
            state: machine.state,
            region: machine.region,
            created_at: machine.created_at,
            instance_id: machine.instance_id,
            private_address: machine.private_ip,
        }
    }
}

impl FlyMachinesProvider {
    /// Create a client for `app_name` at `api_url` (no trailing slash).
    pub fn new(api_url: String, app_name: String, token: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, app_name, token)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        api_url: String,
        app_name: String,
        token: String,
    ) -> Self {
        Self {
            client,
            api_url,
            app_name,
            token,
        }
    }

    /// Build a client from dispatcher config, if it carries a credential.
    pub fn from_config(config: &DispatcherConfig) -> Option<Self> {
        let token = config.api_token.clone()?;
        Some(Self::new(config.api_url.clone(), config.app_name.clone(), token))
    }

    fn machines_url(&self) -> String {
        format!("{}/apps/{}/machines", self.api_url, self.app_name)
    }

    fn machine_url(&self, worker_id: &str) -> String {
        format!("{}/{}", self.machines_url(), worker_id)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ProviderError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ProviderError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// JSON body for `POST /apps/{app}/machines`.
fn create_body(request: &MachineRequest) -> serde_json::Value {
    serde_json::json!({
        "name": request.name,
        "region": request.region,
        "config": {
            "image": request.image,
            "env": request.env,
            "auto_destroy": true,
            "restart": { "policy": "no" },
            "guest": {
                "cpu_kind": request.guest.cpu_kind,
                "cpus": request.guest.cpus,
                "memory_mb": request.guest.memory_mb,
            },
        },
    })
}

#[async_trait]
impl ComputeProvider for FlyMachinesProvider {
    async fn create_machine(&self, request: &MachineRequest) -> Result<WorkerHandle, ProviderError> {
        let response = self
            .client
            .post(self.machines_url())
            .bearer_auth(&self.token)
            .json(&create_body(request))
            .send()
            .await?;

        let machine: FlyMachine = Self::parse_response(response).await?;
        Ok(machine.into())
    }

    async fn get_machine(&self, worker_id: &str) -> Result<WorkerHandle, ProviderError> {
        let response = self
            .client
            .get(self.machine_url(worker_id))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let machine: FlyMachine = Self::parse_response(response).await?;
        Ok(machine.into())
    }

    async fn stop_machine(&self, worker_id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!("{}/stop", self.machine_url(worker_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;

        Self::check_status(response).await
    }

    async fn destroy_machine(&self, worker_id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(self.machine_url(worker_id))
            .query(&[("force", "true")])
            .bearer_auth(&self.token)
            .send()
            .await?;

        Self::check_status(response).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::provider::GuestSpec;

    fn request() -> MachineRequest {
        MachineRequest {
            name: "acme-corp-ab12cd34".to_string(),
            region: "iad".to_string(),
            image: "registry.fly.io/dossier-worker:latest".to_string(),
            env: BTreeMap::from([
                ("JOB_ID".to_string(), "job_1_ab12cd34".to_string()),
                ("WORKER_MODE".to_string(), "true".to_string()),
            ]),
            guest: GuestSpec {
                cpu_kind: "shared".to_string(),
                cpus: 2,
                memory_mb: 4096,
            },
        }
    }

    #[test]
    fn create_body_requests_a_single_shot_machine() {
        let body = create_body(&request());

        assert_eq!(body["name"], "acme-corp-ab12cd34");
        assert_eq!(body["region"], "iad");
        assert_eq!(body["config"]["auto_destroy"], true);
        assert_eq!(body["config"]["restart"]["policy"], "no");
        assert_eq!(body["config"]["env"]["WORKER_MODE"], "true");
        assert_eq!(body["config"]["guest"]["memory_mb"], 4096);
    }

    #[test]
    fn machine_response_maps_to_handle() {
        let machine: FlyMachine = serde_json::from_value(serde_json::json!({
            "id": "3d8d9e1b",
            "name": "acme-corp-ab12cd34",
            "state": "started",
            "region": "iad",
            "instance_id": "01H",
            "private_ip": "fdaa:0:1::2",
            "created_at": "2026-03-01T12:00:00Z",
            "config": {"image": "ignored"}
        }))
        .unwrap();

        let handle = WorkerHandle::from(machine);
        assert_eq!(handle.worker_id, "3d8d9e1b");
        assert_eq!(handle.state, WorkerState::Started);
        assert_eq!(handle.private_address.as_deref(), Some("fdaa:0:1::2"));
        assert!(handle.created_at.is_some());
    }

    #[test]
    fn sparse_machine_response_is_accepted() {
        let machine: FlyMachine =
            serde_json::from_value(serde_json::json!({"id": "m1", "state": "replacing"})).unwrap();

        let handle = WorkerHandle::from(machine);
        assert_eq!(handle.state, WorkerState::Replacing);
        assert!(handle.instance_id.is_none());
        assert!(handle.region.is_empty());
    }

    #[test]
    fn urls_are_scoped_to_the_app() {
        let provider = FlyMachinesProvider::new(
            "https://api.machines.dev/v1".to_string(),
            "dossier-workers".to_string(),
            "token".to_string(),
        );

        assert_eq!(
            provider.machine_url("m1"),
            "https://api.machines.dev/v1/apps/dossier-workers/machines/m1"
        );
    }

    #[test]
    fn from_config_requires_a_token() {
        assert!(FlyMachinesProvider::from_config(&DispatcherConfig::default()).is_none());
    }
}

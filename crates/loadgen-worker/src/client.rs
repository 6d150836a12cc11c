//! HTTP client for the control plane's worker-facing surface — §4.E. One
//! `reqwest::Client` shared across the registration, heartbeat, poll, ack,
//! and telemetry calls, mirroring the thin request-builder style the core
//! crate's own `transport::connect` uses for the target MCP endpoint.

use serde::{Deserialize, Serialize};

use loadgen_core::model::worker::{HostInfo, WorkerCapacity};
use loadgen_core::model::{Assignment, HealthSnapshot, OperationOutcome};
use loadgen_core::telemetry::IngestResult;
use loadgen_core::LoadgenError;

#[derive(Debug, Serialize)]
struct RegisterRequest {
    host_info: HostInfo,
    capacity: WorkerCapacity,
}

#[derive(Debug, Deserialize)]
pub struct RegisterResponse {
    pub worker_id: String,
    pub worker_token: String,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatResponse {
    pub stop_run_ids: Vec<String>,
    pub immediate_stop_run_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TelemetryBatch<'a> {
    run_id: &'a str,
    operations: Vec<OperationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    health: Option<HealthSnapshot>,
}

#[derive(Debug, Serialize)]
struct AckRequest<'a> {
    lease_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct AckResponse {
    #[allow(dead_code)]
    acked: Vec<String>,
}

fn http_err(err: reqwest::Error) -> LoadgenError {
    LoadgenError::Http(err)
}

/// Thin wrapper over the control plane's `/workers/...` routes. Holds the
/// base URL and the bearer token minted at registration; every call past
/// `register` stamps `X-Worker-Token` the way [`crate::runtime`] expects.
pub struct ControlPlaneClient {
    http: reqwest::Client,
    base_url: String,
}

impl ControlPlaneClient {
    pub fn new(base_url: String) -> Self {
        ControlPlaneClient {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn register(&self, host_info: HostInfo, capacity: WorkerCapacity) -> Result<RegisterResponse, LoadgenError> {
        let resp = self
            .http
            .post(format!("{}/workers/register", self.base_url))
            .json(&RegisterRequest { host_info, capacity })
            .send()
            .await
            .map_err(http_err)?;
        resp.error_for_status_ref().map_err(|e| LoadgenError::Http(e))?;
        resp.json().await.map_err(http_err)
    }

    pub async fn heartbeat(&self, worker_id: &str, token: &str, health: HealthSnapshot) -> Result<HeartbeatResponse, LoadgenError> {
        let resp = self
            .http
            .post(format!("{}/workers/{worker_id}/heartbeat", self.base_url))
            .header("X-Worker-Token", token)
            .json(&health)
            .send()
            .await
            .map_err(http_err)?;
        resp.error_for_status_ref().map_err(|e| LoadgenError::Http(e))?;
        resp.json().await.map_err(http_err)
    }

    pub async fn poll_assignments(&self, worker_id: &str, token: &str) -> Result<Vec<Assignment>, LoadgenError> {
        let resp = self
            .http
            .get(format!("{}/workers/{worker_id}/assignments", self.base_url))
            .header("X-Worker-Token", token)
            .send()
            .await
            .map_err(http_err)?;
        resp.error_for_status_ref().map_err(|e| LoadgenError::Http(e))?;
        resp.json().await.map_err(http_err)
    }

    pub async fn ack_assignments(&self, worker_id: &str, token: &str, lease_ids: &[String]) -> Result<(), LoadgenError> {
        if lease_ids.is_empty() {
            return Ok(());
        }
        let resp = self
            .http
            .post(format!("{}/workers/{worker_id}/assignments/ack", self.base_url))
            .header("X-Worker-Token", token)
            .json(&AckRequest { lease_ids })
            .send()
            .await
            .map_err(http_err)?;
        resp.error_for_status_ref().map_err(|e| LoadgenError::Http(e))?;
        let _: AckResponse = resp.json().await.map_err(http_err)?;
        Ok(())
    }

    pub async fn ship_telemetry(
        &self,
        worker_id: &str,
        token: &str,
        run_id: &str,
        operations: Vec<OperationOutcome>,
        health: Option<HealthSnapshot>,
    ) -> Result<IngestResult, LoadgenError> {
        let resp = self
            .http
            .post(format!("{}/workers/{worker_id}/telemetry", self.base_url))
            .header("X-Worker-Token", token)
            .json(&TelemetryBatch { run_id, operations, health })
            .send()
            .await
            .map_err(http_err)?;
        resp.error_for_status_ref().map_err(|e| LoadgenError::Http(e))?;
        resp.json().await.map_err(http_err)
    }
}

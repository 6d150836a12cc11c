//! Worker registration and poll/ack endpoints — §4.E / §6. Workers
//! authenticate with a bearer token minted at registration, constant-time
//! compared against the registry record, not the user-facing
//! [`crate::auth`] principal scheme: a worker is a process, not an
//! operator, and never needs a role.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use loadgen_core::model::{HealthSnapshot, OperationOutcome, Worker};
use loadgen_core::model::worker::{HostInfo, WorkerCapacity};
use loadgen_core::LoadgenError;

use crate::auth::constant_time_eq;
use crate::error::AppError;
use crate::state::AppState;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn worker_token_header(headers: &HeaderMap) -> Option<&str> {
    headers.get("X-Worker-Token").and_then(|v| v.to_str().ok())
}

async fn authenticate_worker(state: &AppState, worker_id: &str, headers: &HeaderMap) -> Result<Worker, AppError> {
    let worker = state
        .registry
        .get(worker_id)
        .await
        .ok_or_else(|| LoadgenError::WorkerNotFound(worker_id.to_string()))?;
    let provided = worker_token_header(headers).unwrap_or("");
    if !constant_time_eq(provided, &worker.worker_token) {
        return Err(AppError(LoadgenError::InvalidWorkerToken));
    }
    Ok(worker)
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub host_info: HostInfo,
    pub capacity: WorkerCapacity,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub worker_id: String,
    pub worker_token: String,
}

pub async fn register(State(state): State<Arc<AppState>>, Json(body): Json<RegisterRequest>) -> Json<RegisterResponse> {
    let (worker_id, worker_token) = state.registry.register(body.host_info, body.capacity, now_ms()).await;
    Json(RegisterResponse { worker_id, worker_token })
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub stop_run_ids: Vec<String>,
    pub immediate_stop_run_ids: Vec<String>,
}

pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
    headers: HeaderMap,
    Json(health): Json<HealthSnapshot>,
) -> Result<Json<HeartbeatResponse>, AppError> {
    let worker = authenticate_worker(&state, &worker_id, &headers).await?;
    state.registry.heartbeat(&worker_id, health, now_ms()).await?;

    let mut stop_run_ids = Vec::new();
    let mut immediate_stop_run_ids = Vec::new();
    for run_id in worker.allocated_vus.keys() {
        if let Ok(run) = state.run_manager.get(run_id).await {
            if run.state == loadgen_core::model::run::RunState::Stopping {
                match run.stop_mode {
                    Some(loadgen_core::model::run::StopMode::Immediate) => immediate_stop_run_ids.push(run_id.clone()),
                    _ => stop_run_ids.push(run_id.clone()),
                }
            }
        }
    }
    Ok(Json(HeartbeatResponse { stop_run_ids, immediate_stop_run_ids }))
}

#[derive(Debug, Deserialize)]
pub struct TelemetryBatch {
    pub run_id: String,
    pub operations: Vec<OperationOutcome>,
    #[serde(default)]
    pub health: Option<HealthSnapshot>,
}

pub async fn telemetry(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
    headers: HeaderMap,
    Json(batch): Json<TelemetryBatch>,
) -> Result<Json<loadgen_core::telemetry::IngestResult>, AppError> {
    authenticate_worker(&state, &worker_id, &headers).await?;

    if let Some(bad) = batch.operations.iter().find(|o| o.worker_id != worker_id) {
        return Err(AppError(LoadgenError::InvalidTelemetry(format!(
            "operation worker_id {} does not match authenticated path worker_id {worker_id}",
            bad.worker_id
        ))));
    }

    let run = state.run_manager.get(&batch.run_id).await?;
    if let Some(bad) = batch.operations.iter().find(|o| !run.config.stages.iter().any(|s| s.stage_id == o.stage_id)) {
        return Err(AppError(LoadgenError::InvalidTelemetry(format!(
            "operation references stage_id {} which is not a configured stage of run {}",
            bad.stage_id, batch.run_id
        ))));
    }

    if let Some(health) = batch.health {
        state.registry.heartbeat(&worker_id, health, now_ms()).await?;
    }

    let result = state.telemetry.ingest_operations(&batch.run_id, batch.operations, now_ms()).await;
    Ok(Json(result))
}

pub async fn poll_assignments(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<loadgen_core::model::Assignment>>, AppError> {
    authenticate_worker(&state, &worker_id, &headers).await?;
    let assignments = state.registry.take_pending_assignments(&worker_id, now_ms()).await;
    for a in &assignments {
        let _ = state.run_manager.record_assignment_dispatched(&a.run_id, &a.lease_id, &worker_id, now_ms()).await;
    }
    Ok(Json(assignments))
}

#[derive(Debug, Deserialize)]
pub struct AckRequest {
    pub lease_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub acked: Vec<String>,
}

pub async fn ack_assignments(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AckRequest>,
) -> Result<Json<AckResponse>, AppError> {
    authenticate_worker(&state, &worker_id, &headers).await?;
    let acked = state.registry.ack_assignments(&worker_id, &body.lease_ids).await;
    Ok(Json(AckResponse { acked }))
}

//! Run lifecycle, metrics, and log endpoints — §6. Thin translation from
//! HTTP to [`RunManager`]/[`TelemetryStore`] calls; handlers never hold a
//! lock across an await boundary themselves; that discipline lives in the
//! domain types they call into.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use loadgen_core::model::config::RunConfig;
use loadgen_core::model::run::{Run, StopMode};
use loadgen_core::runmanager::{PreflightOutcome, StopReason};
use loadgen_core::telemetry::{Aggregator, ErrorSignature, RunMetrics, StabilityMetrics};
use loadgen_core::validate::validate_run_config;

use crate::dispatch;
use crate::error::AppError;
use crate::state::AppState;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Serialize)]
pub struct CreateRunResponse {
    pub run_id: String,
}

pub async fn create_run(State(state): State<Arc<AppState>>, Json(config): Json<RunConfig>) -> Result<Json<CreateRunResponse>, AppError> {
    let errors = validate_run_config(&config);
    if !errors.is_empty() {
        return Err(AppError(loadgen_core::LoadgenError::Validation(errors.join("; "))));
    }
    let run_id = state.run_manager.create(config, now_ms()).await;
    Ok(Json(CreateRunResponse { run_id }))
}

#[derive(Debug, Serialize)]
pub struct RunListResponse {
    pub runs: Vec<Run>,
}

pub async fn list_runs(State(state): State<Arc<AppState>>) -> Result<Json<RunListResponse>, AppError> {
    let ids = state.run_manager.list_ids().await;
    let mut runs = Vec::with_capacity(ids.len());
    for id in ids {
        if let Ok(run) = state.run_manager.get(&id).await {
            runs.push(run);
        }
    }
    Ok(Json(RunListResponse { runs }))
}

pub async fn get_run(State(state): State<Arc<AppState>>, Path(run_id): Path<String>) -> Result<Json<Run>, AppError> {
    Ok(Json(state.run_manager.get(&run_id).await?))
}

pub async fn start_run(State(state): State<Arc<AppState>>, Path(run_id): Path<String>) -> Result<Json<Run>, AppError> {
    state.run_manager.start(&run_id, now_ms()).await?;
    Ok(Json(state.run_manager.get(&run_id).await?))
}

#[derive(Debug, Deserialize, Default)]
pub struct StopRequestBody {
    #[serde(default)]
    pub mode: Option<StopMode>,
}

pub async fn stop_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Json(body): Json<StopRequestBody>,
) -> Result<Json<Run>, AppError> {
    let mode = body.mode.unwrap_or(StopMode::Drain);
    state
        .run_manager
        .request_stop(&run_id, StopReason::Requested(mode), now_ms())
        .await?;
    Ok(Json(state.run_manager.get(&run_id).await?))
}

pub async fn emergency_stop_run(State(state): State<Arc<AppState>>, Path(run_id): Path<String>) -> Result<Json<Run>, AppError> {
    state.run_manager.emergency_stop(&run_id, now_ms()).await?;
    Ok(Json(state.run_manager.get(&run_id).await?))
}

/// Reported back by the worker runtime once its own preflight checks
/// against the target finish; exposed here so a single-process deployment
/// (or a test harness) can drive the same transition over HTTP.
pub async fn record_preflight(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Json(outcome): Json<PreflightOutcomeBody>,
) -> Result<Json<Run>, AppError> {
    let outcome = if outcome.passed {
        PreflightOutcome::Passed
    } else {
        PreflightOutcome::Failed
    };
    state.run_manager.record_preflight_result(&run_id, outcome, now_ms()).await?;
    let run = state.run_manager.get(&run_id).await?;
    dispatch::dispatch_current_stage(&state, &run, now_ms()).await?;
    Ok(Json(run))
}

#[derive(Debug, Deserialize)]
pub struct PreflightOutcomeBody {
    pub passed: bool,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub errors: Vec<String>,
}

pub async fn validate_run(Json(config): Json<RunConfig>) -> Json<ValidateResponse> {
    let errors = validate_run_config(&config);
    Json(ValidateResponse {
        valid: errors.is_empty(),
        errors,
    })
}

#[derive(Debug, Deserialize, Default)]
pub struct MetricsQuery {
    #[serde(default)]
    pub include_time_series: bool,
}

async fn compute_metrics(state: &AppState, run_id: &str, include_time_series: bool) -> Result<RunMetrics, AppError> {
    let run = state.run_manager.get(run_id).await?;
    let outcomes = state.telemetry.operations(run_id).await;
    let duration_s = ((now_ms() - run.created_at_ms).max(0) as f64) / 1000.0;
    Ok(Aggregator::compute(&outcomes, duration_s, include_time_series))
}

pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<RunMetrics>, AppError> {
    Ok(Json(compute_metrics(&state, &run_id, query.include_time_series).await?))
}

pub async fn get_stability(State(state): State<Arc<AppState>>, Path(run_id): Path<String>) -> Result<Json<StabilityMetrics>, AppError> {
    state.run_manager.get(&run_id).await?;
    let outcomes = state.telemetry.operations(&run_id).await;
    Ok(Json(Aggregator::stability(&outcomes)))
}

#[derive(Debug, Deserialize, Default)]
pub struct LogsQuery {
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub vu_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<loadgen_core::telemetry::store::LogEntry>>, AppError> {
    state.run_manager.get(&run_id).await?;
    let limit = query.limit.unwrap_or(1000).min(1000);
    let logs = state.telemetry.logs(&run_id, None).await;
    let filtered: Vec<_> = logs
        .into_iter()
        .filter(|l| query.stage.as_deref().is_none_or(|v| l.stage.as_deref() == Some(v)))
        .filter(|l| query.worker_id.as_deref().is_none_or(|v| l.worker_id.as_deref() == Some(v)))
        .filter(|l| query.vu_id.as_deref().is_none_or(|v| l.vu_id.as_deref() == Some(v)))
        .filter(|l| query.session_id.as_deref().is_none_or(|v| l.session_id.as_deref() == Some(v)))
        .filter(|l| query.operation.as_deref().is_none_or(|v| l.operation.as_deref() == Some(v)))
        .filter(|l| query.tool_name.as_deref().is_none_or(|v| l.tool_name.as_deref() == Some(v)))
        .filter(|l| query.error_code.as_deref().is_none_or(|v| l.error_code.as_deref() == Some(v)))
        .filter(|l| {
            query
                .error_type
                .as_deref()
                .is_none_or(|v| l.error_type.map(|e| format!("{e:?}").to_lowercase()) == Some(v.to_lowercase()))
        })
        .rev()
        .take(limit)
        .collect();
    Ok(Json(filtered))
}

pub async fn get_error_signatures(State(state): State<Arc<AppState>>, Path(run_id): Path<String>) -> Result<Json<Vec<ErrorSignature>>, AppError> {
    state.run_manager.get(&run_id).await?;
    let outcomes = state.telemetry.operations(&run_id).await;
    Ok(Json(loadgen_core::telemetry::signatures::cluster(&outcomes, 10)))
}

#[derive(Debug, Serialize)]
pub struct CompareResponse {
    pub a: RunMetrics,
    pub b: RunMetrics,
}

pub async fn compare_runs(
    State(state): State<Arc<AppState>>,
    Path((run_a, run_b)): Path<(String, String)>,
) -> Result<Json<CompareResponse>, AppError> {
    let a = compute_metrics(&state, &run_a, false).await?;
    let b = compute_metrics(&state, &run_b, false).await?;
    Ok(Json(CompareResponse { a, b }))
}

pub type EventTail = HashMap<&'static str, String>;

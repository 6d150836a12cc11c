//! `workerd` — registers with the control plane, then runs three
//! independently-ticking loops against it: heartbeat, assignment poll, and
//! telemetry shipping. Thin `main.rs` wiring env config and tracing, the
//! same shape `controlplane`'s binary gives its own process.

mod client;
mod runtime;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use client::ControlPlaneClient;
use loadgen_core::model::worker::{HostInfo, WorkerCapacity};
use loadgen_core::model::{HealthSnapshot, OperationOutcome};
use runtime::WorkerRuntime;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const TELEMETRY_INTERVAL: Duration = Duration::from_secs(10);
const TELEMETRY_BATCH_CAP: usize = 5_000;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn host_info() -> HostInfo {
    HostInfo {
        hostname: env_or("LOADGEN_WORKER_HOSTNAME", &env_or("HOSTNAME", "worker")),
        region: std::env::var("LOADGEN_WORKER_REGION").ok(),
    }
}

fn capacity() -> WorkerCapacity {
    WorkerCapacity {
        max_vus: env_or("LOADGEN_WORKER_MAX_VUS", "500").parse().expect("invalid LOADGEN_WORKER_MAX_VUS"),
        max_concurrent_ops: env_or("LOADGEN_WORKER_MAX_CONCURRENT_OPS", "2000")
            .parse()
            .expect("invalid LOADGEN_WORKER_MAX_CONCURRENT_OPS"),
        max_rps: std::env::var("LOADGEN_WORKER_MAX_RPS").ok().and_then(|v| v.parse().ok()),
    }
}

async fn heartbeat_loop(client: Arc<ControlPlaneClient>, runtime: Arc<WorkerRuntime>, worker_id: String, token: String) {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        interval.tick().await;
        let health = HealthSnapshot {
            cpu_pct: 0.0,
            memory_pct: 0.0,
            active_vus: runtime.active_vu_count().await,
            active_sessions: 0,
            in_flight_ops: 0,
            queue_depth: 0,
        };
        match client.heartbeat(&worker_id, &token, health).await {
            Ok(resp) => {
                for run_id in &resp.stop_run_ids {
                    runtime.drain_run(run_id).await;
                }
                for run_id in &resp.immediate_stop_run_ids {
                    runtime.immediate_stop_run(run_id).await;
                }
            }
            Err(err) => tracing::warn!(%err, "heartbeat failed"),
        }
    }
}

async fn poll_loop(client: Arc<ControlPlaneClient>, runtime: Arc<WorkerRuntime>, worker_id: String, token: String) {
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        interval.tick().await;
        match client.poll_assignments(&worker_id, &token).await {
            Ok(assignments) if !assignments.is_empty() => {
                let lease_ids: Vec<String> = assignments.iter().map(|a| a.lease_id.clone()).collect();
                for assignment in assignments {
                    tracing::info!(lease_id = %assignment.lease_id, run_id = %assignment.run_id, vu_count = assignment.vu_count, "accepted assignment");
                    runtime.accept(assignment).await;
                }
                if let Err(err) = client.ack_assignments(&worker_id, &token, &lease_ids).await {
                    tracing::warn!(%err, "failed to ack assignments");
                }
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, "poll assignments failed"),
        }
    }
}

async fn telemetry_loop(
    client: Arc<ControlPlaneClient>,
    worker_id: String,
    token: String,
    mut outcome_rx: mpsc::Receiver<OperationOutcome>,
) {
    let mut interval = tokio::time::interval(TELEMETRY_INTERVAL);
    loop {
        interval.tick().await;
        let mut by_run: HashMap<String, Vec<OperationOutcome>> = HashMap::new();
        let mut drained = 0usize;
        while drained < TELEMETRY_BATCH_CAP {
            match outcome_rx.try_recv() {
                Ok(outcome) => {
                    by_run.entry(outcome.run_id.clone()).or_default().push(outcome);
                    drained += 1;
                }
                Err(_) => break,
            }
        }
        for (run_id, operations) in by_run {
            let count = operations.len();
            if let Err(err) = client.ship_telemetry(&worker_id, &token, &run_id, operations, None).await {
                tracing::warn!(%err, %run_id, count, "failed to ship telemetry batch");
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let control_plane_url = env_or("LOADGEN_CONTROL_PLANE_URL", "http://127.0.0.1:8080");
    let client = Arc::new(ControlPlaneClient::new(control_plane_url));

    let registration = client
        .register(host_info(), capacity())
        .await
        .expect("failed to register with control plane");
    tracing::info!(worker_id = %registration.worker_id, "registered with control plane");

    let (outcome_tx, outcome_rx) = mpsc::channel(TELEMETRY_BATCH_CAP);
    let runtime = Arc::new(WorkerRuntime::new(outcome_tx));

    let worker_id = registration.worker_id;
    let token = registration.worker_token;

    let heartbeat = tokio::spawn(heartbeat_loop(client.clone(), runtime.clone(), worker_id.clone(), token.clone()));
    let poll = tokio::spawn(poll_loop(client.clone(), runtime.clone(), worker_id.clone(), token.clone()));
    let telemetry = tokio::spawn(telemetry_loop(client.clone(), worker_id.clone(), token.clone(), outcome_rx));

    tokio::signal::ctrl_c().await.expect("failed to listen for shutdown signal");
    tracing::info!("shutting down workerd");
    heartbeat.abort();
    poll.abort();
    telemetry.abort();
}

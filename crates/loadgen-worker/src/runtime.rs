//! Assignment lifecycle — turns each polled [`Assignment`] into a running
//! [`VuPool`] against its own [`SessionManager`], the way the control
//! plane's `dispatch` module turns a stage into assignments one layer up.
//! Every VU across every active assignment funnels outcomes into one
//! `mpsc` channel the telemetry-shipping loop drains.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use loadgen_core::engine::{StageWorkload, VuPool};
use loadgen_core::model::{Assignment, OperationOutcome};
use loadgen_core::session::SessionManager;
use loadgen_core::transport::{TransportConfig, TransportTimeouts};

const DEFAULT_POOL_SIZE_FLOOR: u32 = 1;
const DEFAULT_MAX_IDLE_MS: i64 = 300_000;
const DEFAULT_RAMP_WINDOW: Duration = Duration::from_secs(10);

fn fnv_seed(run_id: &str, stage_id: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in run_id.bytes().chain(stage_id.bytes()) {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// An assignment carries only `target_url`, not the rest of the target's
/// transport shape (headers, auth, timeouts, private-network allowlist) —
/// those live on `RunConfig.target`, which the wire format doesn't hand to
/// workers. Connecting with endpoint-only defaults covers the common case;
/// targets that need custom headers or auth need that plumbed onto
/// `Assignment` itself, tracked as a follow-up in DESIGN.md.
fn transport_config_for(assignment: &Assignment) -> TransportConfig {
    TransportConfig {
        endpoint: assignment.target_url.clone(),
        headers: HashMap::new(),
        auth: None,
        allow_private_networks: Vec::new(),
        timeouts: TransportTimeouts::default(),
    }
}

struct ActiveAssignment {
    pool: VuPool,
}

/// Tracks every assignment this worker has accepted, keyed by `lease_id`,
/// plus a `run_id -> lease_ids` index so a heartbeat's stop-run-ids can be
/// turned into the right pools without a linear scan.
pub struct WorkerRuntime {
    active: Mutex<HashMap<String, ActiveAssignment>>,
    by_run: Mutex<HashMap<String, Vec<String>>>,
    outcome_tx: mpsc::Sender<OperationOutcome>,
}

impl WorkerRuntime {
    pub fn new(outcome_tx: mpsc::Sender<OperationOutcome>) -> Self {
        WorkerRuntime {
            active: Mutex::new(HashMap::new()),
            by_run: Mutex::new(HashMap::new()),
            outcome_tx,
        }
    }

    /// Starts a `VuPool` for a freshly polled assignment. Re-delivery of an
    /// already-accepted lease (the control plane re-queues on an overdue
    /// ack) is a no-op rather than a duplicate pool.
    pub async fn accept(&self, assignment: Assignment) {
        {
            let active = self.active.lock().await;
            if active.contains_key(&assignment.lease_id) {
                return;
            }
        }

        let execution_id = loadgen_core::ids::new_execution_id();
        let run_seed = fnv_seed(&assignment.run_id, &assignment.stage_id);
        let session_mode: loadgen_core::model::SessionMode = assignment.session_mode;

        let transport_config = transport_config_for(&assignment);
        let pool_size = assignment.vu_count.max(DEFAULT_POOL_SIZE_FLOOR);
        let session_manager = Arc::new(SessionManager::new(session_mode, transport_config, pool_size, 0, DEFAULT_MAX_IDLE_MS));

        let tool_templates = assignment
            .workload
            .tools
            .as_ref()
            .map(|t| t.templates.clone())
            .unwrap_or_default();

        let workload = StageWorkload {
            run_id: assignment.run_id.clone(),
            execution_id,
            worker_id: assignment.worker_id.clone(),
            stage: assignment.stage_id.clone(),
            stage_id: assignment.stage_id.clone(),
            run_seed,
            operation_mix: assignment.workload.operation_mix.clone(),
            tool_templates,
            think_time: assignment.workload.think_time.clone(),
            in_flight_per_vu: assignment.workload.in_flight_per_vu,
            rate_limit: None,
            reconnect: loadgen_core::engine::ReconnectPolicy::default(),
            tools_list_every_ops: None,
            tools_list_after_errors: None,
        };

        let mut pool = VuPool::new();
        pool.spawn_vus(assignment.vu_count, 0, DEFAULT_RAMP_WINDOW, &workload, session_manager, self.outcome_tx.clone());

        let run_id = assignment.run_id.clone();
        let lease_id = assignment.lease_id.clone();
        self.active.lock().await.insert(lease_id.clone(), ActiveAssignment { pool });
        self.by_run.lock().await.entry(run_id).or_default().push(lease_id);
    }

    pub async fn active_vu_count(&self) -> u32 {
        let active = self.active.lock().await;
        active.values().map(|a| a.pool.active_count() as u32).sum()
    }

    pub async fn drain_run(&self, run_id: &str) {
        self.for_each_lease_of(run_id, |pool| pool.request_drain()).await;
    }

    pub async fn immediate_stop_run(&self, run_id: &str) {
        self.for_each_lease_of(run_id, |pool| pool.request_immediate_stop()).await;
    }

    async fn for_each_lease_of(&self, run_id: &str, f: impl Fn(&VuPool)) {
        let by_run = self.by_run.lock().await;
        let Some(lease_ids) = by_run.get(run_id) else { return };
        let active = self.active.lock().await;
        for lease_id in lease_ids {
            if let Some(a) = active.get(lease_id) {
                f(&a.pool);
            }
        }
    }
}

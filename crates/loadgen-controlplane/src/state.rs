use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use loadgen_core::registry::Registry;
use loadgen_core::runmanager::RunManager;
use loadgen_core::stopcond::StopConditionEvaluator;
use loadgen_core::telemetry::TelemetryStore;

pub struct ControlPlaneConfig {
    pub heartbeat_interval_ms: i64,
    pub ack_timeout_ms: i64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        ControlPlaneConfig {
            heartbeat_interval_ms: 10_000,
            ack_timeout_ms: 60_000,
        }
    }
}

/// Shared application state, analogous to the donor server's
/// `Extension<Arc<dyn CoreService>>` but composed from the concrete
/// domain services rather than a single trait object, since each owns its
/// own lock discipline (`RunManager` per-run, `Registry` map-wide).
pub struct AppState {
    pub run_manager: Arc<RunManager>,
    pub registry: Arc<Registry>,
    pub telemetry: Arc<TelemetryStore>,
    /// One evaluator per `(run_id, stage_id)`, since sustain-window state
    /// is per stage; the worker runtime and the metrics-ingest path share
    /// it to decide whether a stop condition has fired.
    pub stop_evaluators: Mutex<HashMap<String, StopConditionEvaluator>>,
    pub config: ControlPlaneConfig,
}

impl AppState {
    pub fn new(config: ControlPlaneConfig) -> Self {
        AppState {
            run_manager: Arc::new(RunManager::new()),
            registry: Arc::new(Registry::new(config.heartbeat_interval_ms)),
            telemetry: Arc::new(TelemetryStore::default()),
            stop_evaluators: Mutex::new(HashMap::new()),
            config,
        }
    }
}

//! VU engine — §4.C. Spawns and tracks one [`vu::run_virtual_user`] task per
//! virtual user assigned to this worker for a stage, the way a thread group
//! spawns its virtual users with a `JoinSet` and a shared cancellation
//! token.

pub mod ratelimit;
pub mod sampler;
pub mod vu;

pub use ratelimit::TokenBucket;
pub use sampler::{OperationSampler, SampledOperation};
pub use vu::{ReconnectPolicy, VuLoopConfig};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::model::config::{OperationMixEntry, ThinkTimeConfig, ToolTemplate};
use crate::model::telemetry::OperationOutcome;
use crate::model::VuId;
use crate::session::SessionManager;

/// Shared per-stage parameters a [`VuPool`] stamps onto every VU it spawns.
pub struct StageWorkload {
    pub run_id: String,
    pub execution_id: String,
    pub worker_id: String,
    pub stage: String,
    pub stage_id: String,
    pub run_seed: u64,
    pub operation_mix: Vec<OperationMixEntry>,
    pub tool_templates: Vec<ToolTemplate>,
    pub think_time: Option<ThinkTimeConfig>,
    pub in_flight_per_vu: u32,
    pub rate_limit: Option<(f64, f64)>,
    pub reconnect: ReconnectPolicy,
    pub tools_list_every_ops: Option<u32>,
    pub tools_list_after_errors: Option<u32>,
}

/// Manages the set of VU tasks a worker is running for one run/stage.
/// Ramp-up staggering is expressed as a `start_delay` per VU computed from
/// an absolute deadline schedule rather than successive relative sleeps, so
/// thousands of VUs starting over a ramp window don't drift.
pub struct VuPool {
    tasks: JoinSet<()>,
    cancel: CancellationToken,
}

impl VuPool {
    pub fn new() -> Self {
        VuPool {
            tasks: JoinSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawns `count` VUs, staggering their start across `ramp_window` using
    /// evenly spaced absolute delays.
    pub fn spawn_vus(
        &mut self,
        count: u32,
        start_index: u32,
        ramp_window: Duration,
        workload: &StageWorkload,
        session_manager: Arc<SessionManager>,
        outcome_tx: mpsc::Sender<OperationOutcome>,
    ) {
        let step = if count > 0 {
            ramp_window / count.max(1)
        } else {
            Duration::ZERO
        };

        for i in 0..count {
            let vu_index = start_index + i;
            let start_delay = step * i;
            let config = VuLoopConfig {
                vu_id: VuId(vu_index),
                run_id: workload.run_id.clone(),
                execution_id: workload.execution_id.clone(),
                worker_id: workload.worker_id.clone(),
                stage: workload.stage.clone(),
                stage_id: workload.stage_id.clone(),
                run_seed: workload.run_seed,
                operation_mix: workload.operation_mix.clone(),
                tool_templates: workload.tool_templates.clone(),
                think_time: workload.think_time.clone(),
                in_flight_per_vu: workload.in_flight_per_vu,
                rate_limit: workload.rate_limit,
                reconnect: workload.reconnect.clone(),
                tools_list_every_ops: workload.tools_list_every_ops,
                tools_list_after_errors: workload.tools_list_after_errors,
                start_delay,
            };

            let session_manager = Arc::clone(&session_manager);
            let outcome_tx = outcome_tx.clone();
            let cancel = self.cancel.clone();
            self.tasks
                .spawn(async move { vu::run_virtual_user(config, session_manager, outcome_tx, cancel).await });
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    /// Drain stop: no new operations start, but in-flight ones complete
    /// naturally since the VU loop only checks cancellation between ticks.
    pub fn request_drain(&self) {
        self.cancel.cancel();
    }

    /// Immediate stop behaves the same way at this layer — the distinction
    /// between drain and immediate is enforced by the run manager choosing
    /// when to call this versus waiting for in-flight operations to settle
    /// on their own.
    pub fn request_immediate_stop(&self) {
        self.cancel.cancel();
    }

    pub async fn join_all(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }
}

impl Default for VuPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_has_no_active_vus() {
        let pool = VuPool::new();
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn request_drain_cancels_the_shared_token() {
        let pool = VuPool::new();
        assert!(!pool.cancel.is_cancelled());
        pool.request_drain();
        assert!(pool.cancel.is_cancelled());
    }
}

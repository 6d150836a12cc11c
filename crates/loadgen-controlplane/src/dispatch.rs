//! Stage dispatch — §4.F/§4.G glue. Turns "a run just entered a running
//! stage" into a set of [`Assignment`]s on the registry, the way the
//! allocate-then-enqueue step of a scheduler turns a desired VU count into
//! concrete per-worker work orders. Kept in the control plane rather than
//! `loadgen-core` since it composes `RunManager` and `Registry`, which
//! neither owns the other.

use loadgen_core::model::run::{Run, RunState};
use loadgen_core::model::{Assignment, AssignmentState};
use loadgen_core::registry;
use loadgen_core::LoadgenError;

use crate::state::AppState;

fn new_lease_id() -> String {
    format!("lease_{}", uuid::Uuid::new_v4().simple())
}

/// Allocates the current stage's target VU count across available workers
/// and enqueues an [`Assignment`] per worker that received a share. A run
/// not currently in a load-bearing running state is a no-op, not an error —
/// callers don't need to pre-filter by state.
pub async fn dispatch_current_stage(state: &AppState, run: &Run, now_ms: i64) -> Result<usize, LoadgenError> {
    if !matches!(
        run.state,
        RunState::BaselineRunning | RunState::RampRunning | RunState::SoakRunning
    ) {
        return Ok(0);
    }
    let Some(stage_index) = run.current_stage_index else {
        return Ok(0);
    };
    let Some(stage) = run.config.stages.get(stage_index) else {
        return Ok(0);
    };

    let workers = state.registry.list().await;
    let allocation = registry::allocate(stage.load.target_vus, &workers)?;

    for (worker_id, vus) in &allocation {
        state.registry.record_allocation(worker_id, &run.run_id, *vus).await?;
        let assignment = Assignment {
            lease_id: new_lease_id(),
            run_id: run.run_id.clone(),
            stage_id: stage.stage_id.clone(),
            worker_id: worker_id.clone(),
            target_url: run.config.target.url.clone(),
            workload: run.config.workload.clone(),
            session_mode: run.config.session_policy.mode.into(),
            vu_count: *vus,
            state: AssignmentState::Pending,
            enqueued_at_ms: now_ms,
            delivered_at_ms: None,
        };
        state.registry.enqueue_assignment(worker_id, assignment).await;
    }

    Ok(allocation.len())
}

//! Run manager & state machine — §4.G. Every run has its own lock; all
//! state transitions and event-log appends happen while holding it, the way
//! `execute_plan` centralizes its own status transitions under one
//! event-emission path instead of scattering them across call sites. This
//! generalizes that single small `Running`/`Stopping`/`Completed`/`Failed`
//! enum to the full run lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::error::LoadgenError;
use crate::ids;
use crate::model::config::RunConfig;
use crate::model::event::{Event, EventPayload};
use crate::model::run::{Run, RunState, StopMode};
use crate::model::stage::StageKind;

/// Outcome of a preflight check, decided by the caller (worker runtime) and
/// reported back through [`RunManager::record_preflight_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightOutcome {
    Passed,
    Failed,
}

/// Why a run moved into `stopping`.
#[derive(Debug, Clone)]
pub enum StopReason {
    Requested(StopMode),
    ConditionTriggered {
        metric: String,
        threshold: f64,
        observed: f64,
        window_ms: u64,
    },
}

fn stage_kind_order() -> [StageKind; 3] {
    [StageKind::Baseline, StageKind::Ramp, StageKind::Soak]
}

fn state_for_stage_kind(kind: StageKind) -> RunState {
    match kind {
        StageKind::Baseline => RunState::BaselineRunning,
        StageKind::Ramp => RunState::RampRunning,
        StageKind::Soak | StageKind::Spike | StageKind::Custom => RunState::SoakRunning,
        StageKind::Preflight => RunState::PreflightRunning,
    }
}

/// Owns one [`Run`] plus the serialization needed to make every mutation of
/// it (state transition, event append, stage advance) atomic with respect to
/// concurrent callers — worker heartbeats, the HTTP API, and the stop
/// evaluator all reach in through the same lock.
struct RunSlot {
    run: Mutex<Run>,
}

/// Holds every run this control plane knows about, keyed by `run_id`.
/// Looking a run up never blocks on another run's lock.
pub struct RunManager {
    runs: RwLock<HashMap<String, Arc<RunSlot>>>,
}

impl RunManager {
    pub fn new() -> Self {
        RunManager {
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create(&self, config: RunConfig, now_ms: i64) -> String {
        let run_id = ids::new_run_id();
        let mut run = Run::new(run_id.clone(), config, now_ms);
        let event_id = run.next_event_id();
        run.events.push(Event {
            event_id,
            timestamp_ms: now_ms,
            run_id: run_id.clone(),
            payload: EventPayload::RunCreated,
        });
        let slot = Arc::new(RunSlot { run: Mutex::new(run) });
        self.runs.write().await.insert(run_id.clone(), slot);
        run_id
    }

    async fn slot(&self, run_id: &str) -> Result<Arc<RunSlot>, LoadgenError> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| LoadgenError::RunNotFound(run_id.to_string()))
    }

    pub async fn get(&self, run_id: &str) -> Result<Run, LoadgenError> {
        let slot = self.slot(run_id).await?;
        let run = slot.run.lock().await.clone();
        Ok(run)
    }

    pub async fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Appends a state-transition event and applies the new state, all while
    /// still holding the caller's lock on `run`.
    fn transition(run: &mut Run, to: RunState, now_ms: i64) {
        let from = run.state;
        run.state = to;
        let event_id = run.next_event_id();
        run.events.push(Event {
            event_id,
            timestamp_ms: now_ms,
            run_id: run.run_id.clone(),
            payload: EventPayload::StateTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
        });
    }

    fn push_event(run: &mut Run, now_ms: i64, payload: EventPayload) {
        let event_id = run.next_event_id();
        run.events.push(Event {
            event_id,
            timestamp_ms: now_ms,
            run_id: run.run_id.clone(),
            payload,
        });
    }

    /// `created → preflight_running`. Fails if the run is already past
    /// `created`.
    pub async fn start(&self, run_id: &str, now_ms: i64) -> Result<(), LoadgenError> {
        let slot = self.slot(run_id).await?;
        let mut run = slot.run.lock().await;
        if run.state.is_terminal() {
            return Err(LoadgenError::TerminalState(run.state.to_string()));
        }
        if run.state != RunState::Created {
            return Err(LoadgenError::InvalidTransition(format!(
                "cannot start run from state {}",
                run.state
            )));
        }
        Self::transition(&mut run, RunState::PreflightRunning, now_ms);
        Ok(())
    }

    /// Called by the worker runtime once preflight checks against the
    /// target finish. `Passed` advances to the first configured stage
    /// (skipping stage kinds absent from the run's config); `Failed` moves
    /// straight to `preflight_failed`, a terminal-adjacent dead end the run
    /// never leaves on its own.
    pub async fn record_preflight_result(
        &self,
        run_id: &str,
        outcome: PreflightOutcome,
        now_ms: i64,
    ) -> Result<(), LoadgenError> {
        let slot = self.slot(run_id).await?;
        let mut run = slot.run.lock().await;
        if run.state != RunState::PreflightRunning {
            return Err(LoadgenError::InvalidTransition(format!(
                "cannot record preflight result from state {}",
                run.state
            )));
        }
        match outcome {
            PreflightOutcome::Failed => {
                Self::transition(&mut run, RunState::PreflightFailed, now_ms);
                Ok(())
            }
            PreflightOutcome::Passed => {
                Self::transition(&mut run, RunState::PreflightPassed, now_ms);
                self.advance_to_next_stage(&mut run, now_ms);
                Ok(())
            }
        }
    }

    /// Ends the current stage (if any) and enters the next enabled stage in
    /// `{baseline, ramp, soak}` order that appears in the run's config.
    /// Stage kinds the config omits are skipped entirely rather than
    /// treated as failures. When no stage remains, the run moves to
    /// `stopping` and then `analyzing` as if a drain had completed.
    fn advance_to_next_stage(&self, run: &mut Run, now_ms: i64) {
        if let Some(stage_id) = run.current_stage_id().map(|s| s.to_string()) {
            Self::push_event(run, now_ms, EventPayload::StageEnded { stage_id });
        }

        let search_from = run.current_stage_index.map(|i| i + 1).unwrap_or(0);
        let next = run
            .config
            .stages
            .iter()
            .enumerate()
            .skip(search_from)
            .find(|(_, s)| s.enabled && stage_kind_order().contains(&s.stage))
            .map(|(idx, stage)| (idx, stage.stage, stage.stage_id.clone()));

        match next {
            Some((idx, stage_kind, stage_id)) => {
                run.current_stage_index = Some(idx);
                Self::transition(run, state_for_stage_kind(stage_kind), now_ms);
                Self::push_event(run, now_ms, EventPayload::StageStarted { stage_id });
            }
            None => {
                run.current_stage_index = None;
                Self::transition(run, RunState::Stopping, now_ms);
                Self::transition(run, RunState::Analyzing, now_ms);
                Self::transition(run, RunState::Completed, now_ms);
            }
        }
    }

    /// Advances past the currently running stage, used by the worker
    /// runtime once a stage's `duration_ms` elapses without a stop
    /// condition firing.
    pub async fn advance_stage(&self, run_id: &str, now_ms: i64) -> Result<(), LoadgenError> {
        let slot = self.slot(run_id).await?;
        let mut run = slot.run.lock().await;
        if !run.state.is_running() || run.state == RunState::PreflightRunning {
            return Err(LoadgenError::InvalidTransition(format!(
                "cannot advance stage from state {}",
                run.state
            )));
        }
        self.advance_to_next_stage(&mut run, now_ms);
        Ok(())
    }

    /// Requests a drain or immediate stop. Valid from any running state;
    /// moves the run to `stopping` and records the reason. The caller
    /// (worker runtime) is responsible for actually instructing VU pools —
    /// this only updates authoritative state and the event log.
    pub async fn request_stop(&self, run_id: &str, reason: StopReason, now_ms: i64) -> Result<(), LoadgenError> {
        let slot = self.slot(run_id).await?;
        let mut run = slot.run.lock().await;
        if run.state.is_terminal() || run.state == RunState::Stopping || run.state == RunState::Analyzing {
            return Err(LoadgenError::TerminalState(run.state.to_string()));
        }
        if !run.state.is_running() {
            return Err(LoadgenError::InvalidTransition(format!(
                "cannot stop run from state {}",
                run.state
            )));
        }

        match &reason {
            StopReason::Requested(mode) => {
                run.stop_mode = Some(*mode);
                let mode_str = match mode {
                    StopMode::Drain => "drain",
                    StopMode::Immediate => "immediate",
                };
                Self::push_event(&mut run, now_ms, EventPayload::StopRequested {
                    mode: mode_str.to_string(),
                });
            }
            StopReason::ConditionTriggered {
                metric,
                threshold,
                observed,
                window_ms,
            } => {
                run.stop_mode.get_or_insert(StopMode::Drain);
                Self::push_event(&mut run, now_ms, EventPayload::StopConditionTriggered {
                    metric: metric.clone(),
                    threshold: *threshold,
                    observed: *observed,
                    window_ms: *window_ms,
                });
            }
        }

        Self::transition(&mut run, RunState::Stopping, now_ms);
        Ok(())
    }

    /// `stopping → analyzing → completed | failed`, called once the worker
    /// runtime confirms every VU pool has drained or been cancelled.
    pub async fn finalize(&self, run_id: &str, succeeded: bool, now_ms: i64) -> Result<(), LoadgenError> {
        let slot = self.slot(run_id).await?;
        let mut run = slot.run.lock().await;
        if run.state != RunState::Stopping {
            return Err(LoadgenError::InvalidTransition(format!(
                "cannot finalize run from state {}",
                run.state
            )));
        }
        Self::transition(&mut run, RunState::Analyzing, now_ms);
        let end_state = if succeeded { RunState::Completed } else { RunState::Failed };
        Self::transition(&mut run, end_state, now_ms);
        Ok(())
    }

    /// Emergency stop: any non-terminal state jumps straight to `aborted`
    /// without draining or analyzing. Unlike [`RunManager::request_stop`]
    /// this never fails on "already stopping" — an emergency stop against a
    /// run that's already draining still short-circuits it.
    pub async fn emergency_stop(&self, run_id: &str, now_ms: i64) -> Result<(), LoadgenError> {
        let slot = self.slot(run_id).await?;
        let mut run = slot.run.lock().await;
        if run.state.is_terminal() {
            return Err(LoadgenError::TerminalState(run.state.to_string()));
        }
        run.stop_mode = Some(StopMode::Immediate);
        Self::transition(&mut run, RunState::Aborted, now_ms);
        Ok(())
    }

    pub async fn record_worker_capacity_lost(&self, run_id: &str, worker_id: &str, now_ms: i64) -> Result<(), LoadgenError> {
        let slot = self.slot(run_id).await?;
        let mut run = slot.run.lock().await;
        Self::push_event(&mut run, now_ms, EventPayload::WorkerCapacityLost {
            worker_id: worker_id.to_string(),
        });
        Ok(())
    }

    pub async fn record_assignment_dispatched(
        &self,
        run_id: &str,
        lease_id: &str,
        worker_id: &str,
        now_ms: i64,
    ) -> Result<(), LoadgenError> {
        let slot = self.slot(run_id).await?;
        let mut run = slot.run.lock().await;
        Self::push_event(&mut run, now_ms, EventPayload::AssignmentDispatched {
            lease_id: lease_id.to_string(),
            worker_id: worker_id.to_string(),
        });
        Ok(())
    }

    pub async fn record_reconnect(&self, run_id: &str, worker_id: &str, vu_id: &str, now_ms: i64) -> Result<(), LoadgenError> {
        let slot = self.slot(run_id).await?;
        let mut run = slot.run.lock().await;
        Self::push_event(&mut run, now_ms, EventPayload::Reconnect {
            worker_id: worker_id.to_string(),
            vu_id: vu_id.to_string(),
        });
        Ok(())
    }

    pub async fn record_metrics_snapshot(&self, run_id: &str, total_ops: u64, error_rate: f64, now_ms: i64) -> Result<(), LoadgenError> {
        let slot = self.slot(run_id).await?;
        let mut run = slot.run.lock().await;
        Self::push_event(&mut run, now_ms, EventPayload::MetricsSnapshot { total_ops, error_rate });
        Ok(())
    }

    /// Finds the index of `event_id` in the run's event log, used by the
    /// SSE handler to resolve a `Last-Event-ID` header into a resume point.
    pub async fn find_event_index(&self, run_id: &str, event_id: &str) -> Result<Option<usize>, LoadgenError> {
        let slot = self.slot(run_id).await?;
        let run = slot.run.lock().await;
        Ok(run.events.iter().position(|e| e.event_id == event_id))
    }

    /// Returns up to `limit` events starting at `cursor` (an index into the
    /// event log, inclusive), for SSE resumption and `GET` event replay.
    pub async fn tail_events(&self, run_id: &str, cursor: usize, limit: usize) -> Result<Vec<Event>, LoadgenError> {
        let slot = self.slot(run_id).await?;
        let run = slot.run.lock().await;
        Ok(run.events.iter().skip(cursor).take(limit).cloned().collect())
    }

    pub async fn event_count(&self, run_id: &str) -> Result<usize, LoadgenError> {
        let slot = self.slot(run_id).await?;
        let run = slot.run.lock().await;
        Ok(run.events.len())
    }
}

impl Default for RunManager {
    fn default() -> Self {
        Self::new()
    }
}

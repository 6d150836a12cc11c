use serde::{Deserialize, Serialize};

use crate::model::config::RunConfig;
use crate::model::event::Event;

/// Authoritative run state. See §3 for the full transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    PreflightRunning,
    PreflightPassed,
    PreflightFailed,
    BaselineRunning,
    RampRunning,
    SoakRunning,
    Stopping,
    Analyzing,
    Completed,
    Failed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Aborted)
    }

    pub fn is_running(self) -> bool {
        matches!(
            self,
            RunState::PreflightRunning
                | RunState::BaselineRunning
                | RunState::RampRunning
                | RunState::SoakRunning
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Created => "created",
            RunState::PreflightRunning => "preflight_running",
            RunState::PreflightPassed => "preflight_passed",
            RunState::PreflightFailed => "preflight_failed",
            RunState::BaselineRunning => "baseline_running",
            RunState::RampRunning => "ramp_running",
            RunState::SoakRunning => "soak_running",
            RunState::Stopping => "stopping",
            RunState::Analyzing => "analyzing",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    Drain,
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerFailurePolicy {
    FailFast,
    ReplaceIfPossible,
    BestEffort,
}

/// A run: immutable config plus mutable lifecycle state, owned by the run
/// manager under the run's lock. The event log lives alongside it but is
/// appended to, never rewritten — see [`crate::runmanager`].
#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub run_id: String,
    pub config: RunConfig,
    pub state: RunState,
    pub current_stage_index: Option<usize>,
    pub created_at_ms: i64,
    /// Set once a stop has been requested; replayed into worker heartbeat
    /// responses until the run reaches a terminal state.
    pub stop_mode: Option<StopMode>,
    pub events: Vec<Event>,
    next_event_counter: u64,
}

impl Run {
    pub fn new(run_id: String, config: RunConfig, created_at_ms: i64) -> Self {
        Run {
            run_id,
            config,
            state: RunState::Created,
            current_stage_index: None,
            created_at_ms,
            stop_mode: None,
            events: Vec::new(),
            next_event_counter: 1,
        }
    }

    /// Allocates the next monotonic event id for this run. Must only be
    /// called while holding the run's lock.
    pub fn next_event_id(&mut self) -> String {
        let id = crate::ids::format_event_id(self.next_event_counter);
        self.next_event_counter += 1;
        id
    }

    pub fn current_stage_id(&self) -> Option<&str> {
        self.current_stage_index
            .and_then(|i| self.config.stages.get(i))
            .map(|s| s.stage_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_terminal() {
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(RunState::Aborted.is_terminal());
        assert!(!RunState::Created.is_terminal());
        assert!(!RunState::Stopping.is_terminal());
    }

    #[test]
    fn running_states_are_running() {
        assert!(RunState::RampRunning.is_running());
        assert!(!RunState::Stopping.is_running());
        assert!(!RunState::Created.is_running());
    }

    #[test]
    fn display_matches_wire_representation() {
        assert_eq!(RunState::PreflightRunning.to_string(), "preflight_running");
        assert_eq!(RunState::Aborted.to_string(), "aborted");
    }

    #[test]
    fn event_ids_are_monotonic_per_run() {
        let config = crate::model::config::RunConfig::minimal_for_test();
        let mut run = Run::new("run_0123456789abcdef".to_string(), config, 0);
        let a = run.next_event_id();
        let b = run.next_event_id();
        assert!(a < b);
        assert_eq!(a, "evt_0000000000000001");
        assert_eq!(b, "evt_0000000000000002");
    }
}

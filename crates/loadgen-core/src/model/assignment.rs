use serde::{Deserialize, Serialize};

use crate::model::config::WorkloadConfig;
use crate::model::session::SessionMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentState {
    Pending,
    PendingAck,
    Acknowledged,
}

/// A unit of work a worker owes a run. Lifecycle: enqueued by the scheduler
/// -> delivered on poll (`Pending` -> `PendingAck`) -> acknowledged
/// (`PendingAck` -> `Acknowledged`, then removed) or re-queued after
/// `ack_timeout` (`PendingAck` -> `Pending`, same `lease_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub lease_id: String,
    pub run_id: String,
    pub stage_id: String,
    pub worker_id: String,
    pub target_url: String,
    pub workload: WorkloadConfig,
    pub session_mode: SessionMode,
    pub vu_count: u32,
    pub state: AssignmentState,
    pub enqueued_at_ms: i64,
    pub delivered_at_ms: Option<i64>,
}

impl Assignment {
    pub fn is_ack_overdue(&self, now_ms: i64, ack_timeout_ms: i64) -> bool {
        match (self.state, self.delivered_at_ms) {
            (AssignmentState::PendingAck, Some(delivered)) => now_ms - delivered > ack_timeout_ms,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::WorkloadConfig;

    fn make_assignment(state: AssignmentState, delivered_at_ms: Option<i64>) -> Assignment {
        Assignment {
            lease_id: "lease_1".to_string(),
            run_id: "run_0000000000000000".to_string(),
            stage_id: "stg_abc".to_string(),
            worker_id: "wkr_00000000".to_string(),
            target_url: "https://example.com/mcp".to_string(),
            workload: WorkloadConfig::default(),
            session_mode: crate::model::session::SessionMode::Reuse,
            vu_count: 5,
            state,
            enqueued_at_ms: 0,
            delivered_at_ms,
        }
    }

    #[test]
    fn pending_is_never_ack_overdue() {
        let a = make_assignment(AssignmentState::Pending, None);
        assert!(!a.is_ack_overdue(1_000_000, 60_000));
    }

    #[test]
    fn pending_ack_overdue_after_timeout() {
        let a = make_assignment(AssignmentState::PendingAck, Some(0));
        assert!(!a.is_ack_overdue(30_000, 60_000));
        assert!(a.is_ack_overdue(70_000, 60_000));
    }

    #[test]
    fn acknowledged_is_never_overdue() {
        let a = make_assignment(AssignmentState::Acknowledged, Some(0));
        assert!(!a.is_ack_overdue(10_000_000, 60_000));
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    RunCreated,
    StateTransition { from: String, to: String },
    StageStarted { stage_id: String },
    StageEnded { stage_id: String },
    StopRequested { mode: String },
    StopConditionTriggered {
        metric: String,
        threshold: f64,
        observed: f64,
        window_ms: u64,
    },
    WorkerCapacityLost { worker_id: String },
    AssignmentDispatched { lease_id: String, worker_id: String },
    Reconnect { worker_id: String, vu_id: String },
    MetricsSnapshot { total_ops: u64, error_rate: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub timestamp_ms: i64,
    pub run_id: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_payload_tag_is_screaming_snake_case() {
        let payload = EventPayload::StopRequested {
            mode: "drain".to_string(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"type\":\"STOP_REQUESTED\""));
    }

    #[test]
    fn event_roundtrips_through_json() {
        let event = Event {
            event_id: "evt_0000000000000001".to_string(),
            timestamp_ms: 1234,
            run_id: "run_0".to_string(),
            payload: EventPayload::RunCreated,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_id, event.event_id);
        matches!(back.payload, EventPayload::RunCreated);
    }

    #[test]
    fn state_transition_carries_from_and_to() {
        let payload = EventPayload::StateTransition {
            from: "created".to_string(),
            to: "preflight_running".to_string(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("created"));
        assert!(json.contains("preflight_running"));
    }
}

use serde::{Deserialize, Serialize};

/// Error categories carried on a telemetry outcome, distinct from the
/// control-plane HTTP [`crate::error::ErrorType`] taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationErrorType {
    Connect,
    Init,
    Timeout,
    Cancelled,
    RateLimited,
    Protocol,
    Internal,
    ConnectionDropped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub is_streaming: bool,
    pub events_count: u32,
    pub stalled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stall_duration_ms: Option<u64>,
    pub ended_normally: bool,
}

impl Default for StreamInfo {
    fn default() -> Self {
        StreamInfo {
            is_streaming: false,
            events_count: 0,
            stalled: false,
            stall_duration_ms: None,
            ended_normally: true,
        }
    }
}

/// One telemetry record produced by executing a single operation on a VU.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub run_id: String,
    pub execution_id: String,
    pub stage: String,
    pub stage_id: String,
    pub worker_id: String,
    pub vu_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<OperationErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamInfo>,
    pub timestamp_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OperationOutcome {
        OperationOutcome {
            run_id: "run_0".to_string(),
            execution_id: "exe_0".to_string(),
            stage: "ramp".to_string(),
            stage_id: "stg_0".to_string(),
            worker_id: "wkr_0".to_string(),
            vu_id: "vu_0".to_string(),
            session_id: Some("sess_0".to_string()),
            operation: "tools/call".to_string(),
            tool_name: Some("search".to_string()),
            ok: true,
            latency_ms: 42,
            error_type: None,
            error_code: None,
            http_status: Some(200),
            bytes_in: 512,
            bytes_out: 128,
            stream: None,
            timestamp_ms: 1000,
        }
    }

    #[test]
    fn stream_zero_events_defaults_ended_normally() {
        let stream = StreamInfo::default();
        assert_eq!(stream.events_count, 0);
        assert!(stream.ended_normally);
        assert!(!stream.stalled);
    }

    #[test]
    fn outcome_serde_roundtrip() {
        let outcome = sample();
        let json = serde_json::to_string(&outcome).unwrap();
        let back: OperationOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, outcome.run_id);
        assert_eq!(back.latency_ms, outcome.latency_ms);
        assert!(back.ok);
    }

    #[test]
    fn error_fields_skipped_when_absent() {
        let outcome = sample();
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(!json.contains("error_type"));
        assert!(!json.contains("error_code"));
    }
}

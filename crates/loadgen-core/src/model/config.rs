//! Deserialization of the `run-config/v1` document described in §6. Plain
//! `serde` structs with explicit defaults, the same idiom the CSV data
//! source and test-plan loaders use elsewhere in this codebase — no
//! runtime-reflective schema framework.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::stage::Stage;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    Bearer { tokens: Vec<String> },
    Basic { tokens: Vec<String> },
    Custom { tokens: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_ms: u64,
    #[serde(default = "default_stream_stall_ms")]
    pub stream_stall_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        TimeoutsConfig {
            connect_ms: default_connect_timeout_ms(),
            request_ms: default_request_timeout_ms(),
            stream_stall_ms: default_stream_stall_ms(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_stream_stall_ms() -> u64 {
    15_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub url: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

fn default_transport() -> String {
    "streamable_http".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMixEntry {
    pub operation: String,
    pub weight: f64,
    #[serde(default)]
    pub tool_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSelectionMode {
    Weighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSelectionConfig {
    pub mode: ToolSelectionMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTemplate {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub selection: ToolSelectionConfig,
    #[serde(default)]
    pub templates: Vec<ToolTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkTimeConfig {
    #[serde(default)]
    pub base_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    #[serde(default)]
    pub operation_mix: Vec<OperationMixEntry>,
    #[serde(default)]
    pub tools: Option<ToolsConfig>,
    #[serde(default)]
    pub think_time: Option<ThinkTimeConfig>,
    #[serde(default = "default_in_flight_per_vu")]
    pub in_flight_per_vu: u32,
}

fn default_in_flight_per_vu() -> u32 {
    1
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        WorkloadConfig {
            operation_mix: vec![OperationMixEntry {
                operation: "ping".to_string(),
                weight: 1.0,
                tool_name: None,
            }],
            tools: None,
            think_time: None,
            in_flight_per_vu: default_in_flight_per_vu(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicyMode {
    Reuse,
    PerRequest,
    Pool,
    Churn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPolicyConfig {
    pub mode: SessionPolicyMode,
    #[serde(default)]
    pub pool_size: Option<u32>,
    #[serde(default)]
    pub churn_interval_ops: Option<u32>,
    #[serde(default = "default_max_idle_ms")]
    pub max_idle_ms: u64,
}

fn default_max_idle_ms() -> u64 {
    60_000
}

impl Default for SessionPolicyConfig {
    fn default() -> Self {
        SessionPolicyConfig {
            mode: SessionPolicyMode::Reuse,
            pool_size: None,
            churn_interval_ops: None,
            max_idle_ms: default_max_idle_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMetric {
    ErrorRate,
    LatencyP50Ms,
    LatencyP95Ms,
    LatencyP99Ms,
    StreamStallSeconds,
    MinEventsPerSecond,
    StreamStallCount,
    ConnectionErrorRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
}

impl Comparator {
    pub fn evaluate(self, observed: f64, threshold: f64) -> bool {
        match self {
            Comparator::Lt => observed < threshold,
            Comparator::Lte => observed <= threshold,
            Comparator::Gt => observed > threshold,
            Comparator::Gte => observed >= threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopConditionConfig {
    pub metric: StopMetric,
    pub comparator: Comparator,
    pub threshold: f64,
    pub window_ms: u64,
    #[serde(default = "default_sustain_windows")]
    pub sustain_windows: u32,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub emergency: bool,
}

fn default_sustain_windows() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerFailurePolicyConfig {
    FailFast,
    ReplaceIfPossible,
    BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardCaps {
    #[serde(default)]
    pub max_vus: Option<u32>,
    #[serde(default)]
    pub max_duration_ms: Option<u64>,
    #[serde(default)]
    pub max_errors: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub hard_caps: HardCaps,
    #[serde(default = "default_worker_failure_policy")]
    pub worker_failure_policy: WorkerFailurePolicyConfig,
}

fn default_worker_failure_policy() -> WorkerFailurePolicyConfig {
    WorkerFailurePolicyConfig::FailFast
}

impl Default for HardCaps {
    fn default() -> Self {
        HardCaps {
            max_vus: None,
            max_duration_ms: None,
            max_errors: None,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        SafetyConfig {
            hard_caps: HardCaps::default(),
            worker_failure_policy: default_worker_failure_policy(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowlistMode {
    AllowAll,
    AllowList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowlistConfig {
    #[serde(default = "default_allowlist_mode")]
    pub mode: AllowlistMode,
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

fn default_allowlist_mode() -> AllowlistMode {
    AllowlistMode::AllowAll
}

impl Default for AllowlistConfig {
    fn default() -> Self {
        AllowlistConfig {
            mode: default_allowlist_mode(),
            allowed_hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub allowlist: AllowlistConfig,
}

/// The top-level `run-config/v1` document, the single artifact `POST /runs`
/// validates and stores as a run's immutable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub schema_version: String,
    pub scenario_id: String,
    pub target: TargetConfig,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub session_policy: SessionPolicyConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
}

impl RunConfig {
    #[cfg(test)]
    pub fn minimal_for_test() -> Self {
        RunConfig {
            schema_version: "run-config/v1".to_string(),
            scenario_id: "test".to_string(),
            target: TargetConfig {
                url: "https://example.com/mcp".to_string(),
                transport: default_transport(),
                headers: HashMap::new(),
                auth: None,
                timeouts: TimeoutsConfig::default(),
            },
            stages: Vec::new(),
            workload: WorkloadConfig::default(),
            session_policy: SessionPolicyConfig::default(),
            safety: SafetyConfig::default(),
            environment: EnvironmentConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_deserializes_with_defaults() {
        let json = r#"{
            "schema_version": "run-config/v1",
            "scenario_id": "smoke",
            "target": { "url": "https://example.com/mcp" },
            "stages": []
        }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.target.transport, "streamable_http");
        assert_eq!(config.target.timeouts.connect_ms, 10_000);
        assert_eq!(config.workload.in_flight_per_vu, 1);
        assert!(matches!(
            config.session_policy.mode,
            SessionPolicyMode::Reuse
        ));
        assert!(matches!(
            config.safety.worker_failure_policy,
            WorkerFailurePolicyConfig::FailFast
        ));
        assert!(matches!(
            config.environment.allowlist.mode,
            AllowlistMode::AllowAll
        ));
    }

    #[test]
    fn comparator_parses_symbolic_operators() {
        let json = r#"{"metric":"error_rate","comparator":">","threshold":0.5,"window_ms":500}"#;
        let cond: StopConditionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cond.comparator, Comparator::Gt);
        assert_eq!(cond.sustain_windows, 1);
        assert!(cond.comparator.evaluate(0.6, 0.5));
        assert!(!cond.comparator.evaluate(0.4, 0.5));
    }

    #[test]
    fn config_round_trips_through_serialize_and_deserialize() {
        let original = RunConfig::minimal_for_test();
        let json = serde_json::to_string(&original).unwrap();
        let back: RunConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.scenario_id, original.scenario_id);
        assert_eq!(back.target.url, original.target.url);
    }

    #[test]
    fn auth_config_bearer_roundtrip() {
        let auth = AuthConfig::Bearer {
            tokens: vec!["secret".to_string()],
        };
        let json = serde_json::to_string(&auth).unwrap();
        let back: AuthConfig = serde_json::from_str(&json).unwrap();
        match back {
            AuthConfig::Bearer { tokens } => assert_eq!(tokens, vec!["secret".to_string()]),
            _ => panic!("expected bearer"),
        }
    }
}

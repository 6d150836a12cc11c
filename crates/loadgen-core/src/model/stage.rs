use serde::{Deserialize, Serialize};

use crate::model::config::StopConditionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Preflight,
    Baseline,
    Ramp,
    Soak,
    Spike,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageLoad {
    pub target_vus: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_rps: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampPlan {
    pub step_every_ms: u64,
    pub step_vus: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub stage_id: String,
    pub stage: StageKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub duration_ms: u64,
    pub load: StageLoad,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp: Option<RampPlan>,
    #[serde(default)]
    pub stop_conditions: Vec<StopConditionConfig>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_enabled_defaults_to_true_when_absent() {
        let json = r#"{"stage_id":"stg_abc","stage":"ramp","duration_ms":1000,"load":{"target_vus":5}}"#;
        let stage: Stage = serde_json::from_str(json).unwrap();
        assert!(stage.enabled);
        assert!(stage.ramp.is_none());
        assert!(stage.stop_conditions.is_empty());
    }

    #[test]
    fn stage_kind_serde_roundtrip() {
        for kind in [
            StageKind::Preflight,
            StageKind::Baseline,
            StageKind::Ramp,
            StageKind::Soak,
            StageKind::Spike,
            StageKind::Custom,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            let back: StageKind = serde_json::from_str(&json).unwrap();
            assert_eq!(kind, back);
        }
    }

    #[test]
    fn zero_target_vus_is_representable() {
        let load = StageLoad {
            target_vus: 0,
            target_rps: None,
        };
        assert_eq!(load.target_vus, 0);
    }
}

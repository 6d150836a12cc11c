//! Schema + semantic validation for a `run-config/v1` document — §6,
//! `POST /runs/{id}/validate`. Deserialization already enforces the schema
//! shape (plain serde with defaults, per [`crate::model::config`]); this
//! module is the semantic pass a config must additionally pass before a
//! run is allowed to start, the same "collect every violation, don't stop
//! at the first" approach a form validator uses rather than raising on the
//! first bad field.

use crate::model::config::RunConfig;
use crate::model::stage::StageKind;
use crate::operations::BUILTIN_OPERATIONS;

/// Validates a run config beyond what `serde` already enforces. Returns
/// every violation found rather than the first one, so a client can fix a
/// config in one round trip.
pub fn validate_run_config(config: &RunConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.schema_version != "run-config/v1" {
        errors.push(format!("unsupported schema_version: {}", config.schema_version));
    }
    if config.target.url.is_empty() {
        errors.push("target.url must not be empty".to_string());
    }
    if config.stages.is_empty() {
        errors.push("at least one stage is required".to_string());
    }

    let mut seen_stage_ids = std::collections::HashSet::new();
    for stage in &config.stages {
        if !crate::ids::is_valid_stage_id(&stage.stage_id) {
            errors.push(format!("invalid stage_id: {}", stage.stage_id));
        }
        if !seen_stage_ids.insert(stage.stage_id.clone()) {
            errors.push(format!("duplicate stage_id: {}", stage.stage_id));
        }
        if stage.duration_ms == 0 && stage.stage != StageKind::Preflight {
            errors.push(format!("stage {} must have duration_ms > 0", stage.stage_id));
        }
        if stage.load.target_vus == 0 {
            errors.push(format!("stage {} must have load.target_vus > 0", stage.stage_id));
        }
        for cond in &stage.stop_conditions {
            if cond.window_ms == 0 {
                errors.push(format!("stage {} has a stop condition with window_ms = 0", stage.stage_id));
            }
        }
    }

    if config.workload.operation_mix.is_empty() {
        errors.push("workload.operation_mix must not be empty".to_string());
    }
    for entry in &config.workload.operation_mix {
        if !BUILTIN_OPERATIONS.contains(&entry.operation.as_str()) {
            errors.push(format!("unknown operation in operation_mix: {}", entry.operation));
        }
        if entry.weight <= 0.0 {
            errors.push(format!("operation_mix entry for {} must have weight > 0", entry.operation));
        }
        if entry.operation == "tools/call" && entry.tool_name.is_none() {
            let has_templates = config
                .workload
                .tools
                .as_ref()
                .is_some_and(|t| !t.templates.is_empty());
            if !has_templates {
                errors.push("operation_mix includes tools/call but no tool_name or tool templates are configured".to_string());
            }
        }
    }

    if config.workload.in_flight_per_vu == 0 {
        errors.push("workload.in_flight_per_vu must be > 0".to_string());
    }

    if let Some(max_vus) = config.safety.hard_caps.max_vus {
        let requested: u32 = config.stages.iter().map(|s| s.load.target_vus).max().unwrap_or(0);
        if requested > max_vus {
            errors.push(format!(
                "stage load {requested} exceeds safety.hard_caps.max_vus {max_vus}"
            ));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::stage::{Stage, StageLoad};

    fn valid_stage() -> Stage {
        Stage {
            stage_id: "stg_abc".to_string(),
            stage: StageKind::Baseline,
            enabled: true,
            duration_ms: 60_000,
            load: StageLoad {
                target_vus: 10,
                target_rps: None,
            },
            ramp: None,
            stop_conditions: Vec::new(),
        }
    }

    fn valid_config() -> RunConfig {
        let mut config = RunConfig::minimal_for_test();
        config.stages = vec![valid_stage()];
        config
    }

    #[test]
    fn a_minimal_valid_config_has_no_errors() {
        assert!(validate_run_config(&valid_config()).is_empty());
    }

    #[test]
    fn empty_stages_is_rejected() {
        let mut config = valid_config();
        config.stages.clear();
        assert!(validate_run_config(&config).iter().any(|e| e.contains("at least one stage")));
    }

    #[test]
    fn malformed_stage_id_is_rejected() {
        let mut config = valid_config();
        config.stages[0].stage_id = "not-an-id".to_string();
        assert!(validate_run_config(&config).iter().any(|e| e.contains("invalid stage_id")));
    }

    #[test]
    fn duplicate_stage_ids_are_rejected() {
        let mut config = valid_config();
        config.stages.push(valid_stage());
        assert!(validate_run_config(&config).iter().any(|e| e.contains("duplicate stage_id")));
    }

    #[test]
    fn unknown_operation_in_mix_is_rejected() {
        let mut config = valid_config();
        config.workload.operation_mix[0].operation = "frobnicate".to_string();
        assert!(validate_run_config(&config).iter().any(|e| e.contains("unknown operation")));
    }

    #[test]
    fn tools_call_without_name_or_templates_is_rejected() {
        let mut config = valid_config();
        config.workload.operation_mix[0].operation = "tools/call".to_string();
        config.workload.operation_mix[0].tool_name = None;
        config.workload.tools = None;
        assert!(validate_run_config(&config).iter().any(|e| e.contains("tools/call")));
    }

    #[test]
    fn stage_load_exceeding_hard_cap_is_rejected() {
        let mut config = valid_config();
        config.stages[0].load.target_vus = 1_000;
        config.safety.hard_caps.max_vus = Some(100);
        assert!(validate_run_config(&config).iter().any(|e| e.contains("exceeds safety.hard_caps")));
    }

    #[test]
    fn collects_multiple_errors_in_one_pass() {
        let mut config = valid_config();
        config.stages.clear();
        config.workload.operation_mix.clear();
        let errors = validate_run_config(&config);
        assert!(errors.len() >= 2);
    }
}

//! Error-signature clustering — §4.H. Groups operation failures by a
//! normalized form of their error message so a dashboard can show "12 ops
//! failed with connection refused" instead of 12 distinct strings that
//! differ only by port number or request id.

use std::collections::HashMap;

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::model::OperationOutcome;

fn number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").unwrap())
}

fn quoted_string_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""[^"]*"|'[^']*'"#).unwrap())
}

/// Replaces numeric runs with `<NUM>` and quoted strings with `<STR>` so
/// messages that differ only by an id or a port collapse to one signature.
fn normalize(message: &str) -> String {
    let without_strings = quoted_string_pattern().replace_all(message, "<STR>");
    number_pattern().replace_all(&without_strings, "<NUM>").into_owned()
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSignature {
    pub signature: String,
    pub sample_message: String,
    pub count: u64,
    pub affected_operations: Vec<String>,
    pub affected_tools: Vec<String>,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
}

/// Returns the top `limit` signatures by occurrence count, descending.
pub fn cluster(outcomes: &[OperationOutcome], limit: usize) -> Vec<ErrorSignature> {
    struct Agg {
        sample_message: String,
        count: u64,
        operations: Vec<String>,
        tools: Vec<String>,
        first_seen_ms: i64,
        last_seen_ms: i64,
    }

    let mut by_signature: HashMap<String, Agg> = HashMap::new();

    for o in outcomes {
        if o.ok {
            continue;
        }
        let message = o.error_code.clone().unwrap_or_else(|| "unknown_error".to_string());
        let signature = normalize(&message);
        let agg = by_signature.entry(signature).or_insert_with(|| Agg {
            sample_message: message.clone(),
            count: 0,
            operations: Vec::new(),
            tools: Vec::new(),
            first_seen_ms: o.timestamp_ms,
            last_seen_ms: o.timestamp_ms,
        });
        agg.count += 1;
        agg.first_seen_ms = agg.first_seen_ms.min(o.timestamp_ms);
        agg.last_seen_ms = agg.last_seen_ms.max(o.timestamp_ms);
        if !agg.operations.contains(&o.operation) {
            agg.operations.push(o.operation.clone());
        }
        if let Some(tool) = &o.tool_name {
            if !agg.tools.contains(tool) {
                agg.tools.push(tool.clone());
            }
        }
    }

    let mut signatures: Vec<ErrorSignature> = by_signature
        .into_iter()
        .map(|(signature, agg)| ErrorSignature {
            signature,
            sample_message: agg.sample_message,
            count: agg.count,
            affected_operations: agg.operations,
            affected_tools: agg.tools,
            first_seen_ms: agg.first_seen_ms,
            last_seen_ms: agg.last_seen_ms,
        })
        .collect();

    signatures.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.signature.cmp(&b.signature)));
    signatures.truncate(limit);
    signatures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::telemetry::OperationErrorType;

    fn failed_outcome(error_code: &str, operation: &str, ts: i64) -> OperationOutcome {
        OperationOutcome {
            run_id: "run_0".to_string(),
            execution_id: "exe_0".to_string(),
            stage: "ramp".to_string(),
            stage_id: "stg_0".to_string(),
            worker_id: "wkr_0".to_string(),
            vu_id: "vu_0".to_string(),
            session_id: None,
            operation: operation.to_string(),
            tool_name: None,
            ok: false,
            latency_ms: 1,
            error_type: Some(OperationErrorType::Internal),
            error_code: Some(error_code.to_string()),
            http_status: None,
            bytes_in: 0,
            bytes_out: 0,
            stream: None,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn normalize_collapses_numbers_and_quoted_strings() {
        let a = normalize("connect to 127.0.0.1:8080 failed");
        let b = normalize("connect to 10.0.0.2:9090 failed");
        assert_eq!(a, b);

        let c = normalize(r#"tool "search" not found"#);
        let d = normalize(r#"tool "fetch" not found"#);
        assert_eq!(c, d);
    }

    #[test]
    fn cluster_groups_similar_messages_and_counts() {
        let outcomes = vec![
            failed_outcome("connect to 127.0.0.1:8080 failed", "ping", 0),
            failed_outcome("connect to 10.0.0.2:9090 failed", "ping", 10),
            failed_outcome("tool not found", "tools/call", 20),
        ];
        let signatures = cluster(&outcomes, 10);
        assert_eq!(signatures.len(), 2);
        assert_eq!(signatures[0].count, 2);
        assert_eq!(signatures[0].affected_operations, vec!["ping".to_string()]);
    }

    #[test]
    fn cluster_respects_limit_and_orders_by_count_desc() {
        let outcomes = vec![
            failed_outcome("error a", "ping", 0),
            failed_outcome("error a", "ping", 1),
            failed_outcome("error b", "ping", 2),
        ];
        let signatures = cluster(&outcomes, 1);
        assert_eq!(signatures.len(), 1);
        assert_eq!(signatures[0].count, 2);
    }

    #[test]
    fn cluster_ignores_successful_outcomes() {
        let mut ok = failed_outcome("error a", "ping", 0);
        ok.ok = true;
        let signatures = cluster(&[ok], 10);
        assert!(signatures.is_empty());
    }

    #[test]
    fn cluster_tracks_first_and_last_seen() {
        let outcomes = vec![
            failed_outcome("error a", "ping", 100),
            failed_outcome("error a", "ping", 500),
        ];
        let signatures = cluster(&outcomes, 10);
        assert_eq!(signatures[0].first_seen_ms, 100);
        assert_eq!(signatures[0].last_seen_ms, 500);
    }
}

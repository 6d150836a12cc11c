//! Operation plug-in registry — §4.D. A registry maps operation name to a
//! `{validate, execute}` capability pair, the same dynamic-dispatch-by-name
//! shape the MCP tool registry on the server side uses, run here as a
//! client driving those methods against a target.

use serde_json::Value;

use crate::transport::{Connection, TransportCallResult};

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

/// Validates the params object for an operation before it is dispatched.
/// Returns `Err` with `error_type = protocol`, `code = VALIDATION_ERROR`
/// mapped onto the outcome by the caller.
pub fn validate(operation: &str, params: &Value) -> Result<(), ValidationError> {
    match operation {
        "tools/list" | "resources/list" | "prompts/list" | "ping" | "notifications/subscribe" => Ok(()),
        "tools/call" => require_string_field(params, "name"),
        "resources/read" => require_string_field(params, "uri"),
        "prompts/get" => require_string_field(params, "prompt_name"),
        other => Err(ValidationError {
            code: "UNKNOWN_OPERATION",
            message: format!("unknown operation: {other}"),
        }),
    }
}

fn require_string_field(params: &Value, field: &str) -> Result<(), ValidationError> {
    match params.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(()),
        _ => Err(ValidationError {
            code: "VALIDATION_ERROR",
            message: format!("'{field}' is required and must be a non-empty string"),
        }),
    }
}

/// Executes a validated operation against an established connection.
/// Callers are expected to have already called [`validate`] and must not
/// call this for an unrecognized operation name.
pub async fn execute(connection: &Connection, operation: &str, params: &Value) -> TransportCallResult {
    match operation {
        "tools/list" => connection.tools_list().await,
        "tools/call" => {
            let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
            let arguments = params.get("arguments").cloned();
            connection.tools_call(name, arguments).await
        }
        "resources/list" => connection.resources_list().await,
        "resources/read" => {
            let uri = params.get("uri").and_then(Value::as_str).unwrap_or_default();
            connection.resources_read(uri).await
        }
        "prompts/list" => connection.prompts_list().await,
        "prompts/get" => {
            let prompt_name = params
                .get("prompt_name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let arguments = params.get("arguments").cloned();
            connection.prompts_get(prompt_name, arguments).await
        }
        "ping" => connection.ping().await,
        "notifications/subscribe" => connection.subscribe_notifications().await,
        other => TransportCallResult {
            latency_ms: 0,
            ok: false,
            bytes_in: 0,
            bytes_out: 0,
            http_status: None,
            error: Some(crate::transport::TransportError {
                kind: crate::transport::TransportErrorKind::Protocol,
                code: "UNKNOWN_OPERATION".to_string(),
                message: format!("unknown operation: {other}"),
            }),
            result: None,
            stream: None,
        },
    }
}

/// The built-in operation names, used by the VU engine to validate an
/// operation mix at run-validation time.
pub const BUILTIN_OPERATIONS: &[&str] = &[
    "tools/list",
    "tools/call",
    "resources/list",
    "resources/read",
    "prompts/list",
    "prompts/get",
    "ping",
    "notifications/subscribe",
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_and_list_ops_require_no_params() {
        assert!(validate("ping", &json!({})).is_ok());
        assert!(validate("tools/list", &json!({})).is_ok());
        assert!(validate("resources/list", &json!(null)).is_ok());
    }

    #[test]
    fn tools_call_requires_name() {
        assert!(validate("tools/call", &json!({})).is_err());
        assert!(validate("tools/call", &json!({"name": ""})).is_err());
        assert!(validate("tools/call", &json!({"name": "search"})).is_ok());
    }

    #[test]
    fn resources_read_requires_uri() {
        assert!(validate("resources/read", &json!({})).is_err());
        assert!(validate("resources/read", &json!({"uri": "file:///a"})).is_ok());
    }

    #[test]
    fn prompts_get_requires_prompt_name() {
        assert!(validate("prompts/get", &json!({})).is_err());
        assert!(validate("prompts/get", &json!({"prompt_name": "greeting"})).is_ok());
    }

    #[test]
    fn unknown_operation_is_rejected_at_validation() {
        let err = validate("frobnicate", &json!({})).unwrap_err();
        assert_eq!(err.code, "UNKNOWN_OPERATION");
    }

    #[test]
    fn builtin_operations_all_validate_with_minimal_params() {
        for op in BUILTIN_OPERATIONS {
            let params = match *op {
                "tools/call" => json!({"name": "x"}),
                "resources/read" => json!({"uri": "x"}),
                "prompts/get" => json!({"prompt_name": "x"}),
                _ => json!({}),
            };
            assert!(validate(op, &params).is_ok(), "operation {op} should validate");
        }
    }
}

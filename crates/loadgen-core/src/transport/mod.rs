pub mod config;
pub mod protocol;
pub mod ssrf;

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

pub use config::{TransportAuth, TransportConfig, TransportTimeouts};
pub use protocol::{InitializeResult, JsonRpcRequest, JsonRpcResponse};

use crate::error::LoadgenError;
use crate::model::telemetry::{OperationErrorType, StreamInfo};

/// The kind of transport-level error, mirroring §4.A's error taxonomy. Kept
/// distinct from [`OperationErrorType`] on the model because the transport
/// layer has no knowledge of `connection_dropped` (a session-manager
/// judgment call made from the outside).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Cancelled,
    RateLimited,
    Protocol,
    Internal,
    Init,
}

impl From<TransportErrorKind> for OperationErrorType {
    fn from(kind: TransportErrorKind) -> Self {
        match kind {
            TransportErrorKind::Connect => OperationErrorType::Connect,
            TransportErrorKind::Timeout => OperationErrorType::Timeout,
            TransportErrorKind::Cancelled => OperationErrorType::Cancelled,
            TransportErrorKind::RateLimited => OperationErrorType::RateLimited,
            TransportErrorKind::Protocol => OperationErrorType::Protocol,
            TransportErrorKind::Internal => OperationErrorType::Internal,
            TransportErrorKind::Init => OperationErrorType::Init,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub code: String,
    pub message: String,
}

/// The result of a single transport-level call, matching §4.A's
/// `OperationOutcome` shape. The VU engine enriches this with run/worker/vu
/// context before it becomes a [`crate::model::telemetry::OperationOutcome`].
#[derive(Debug, Clone)]
pub struct TransportCallResult {
    pub latency_ms: u64,
    pub ok: bool,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub http_status: Option<u16>,
    pub error: Option<TransportError>,
    pub result: Option<Value>,
    /// Populated only when the response was read as a server-sent-event
    /// stream rather than a single JSON body.
    pub stream: Option<StreamInfo>,
}

/// An MCP connection over streamable HTTP. One per session.
pub struct Connection {
    client: reqwest::Client,
    endpoint: url::Url,
    headers: HeaderMap,
    timeouts: TransportTimeouts,
    next_id: std::sync::atomic::AtomicI64,
    initialized: bool,
}

pub async fn connect(config: &TransportConfig) -> Result<Connection, LoadgenError> {
    let endpoint = ssrf::check_url(&config.endpoint, &config.allow_private_networks)?;

    let mut headers = HeaderMap::new();
    for (k, v) in &config.headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|e| LoadgenError::Validation(format!("invalid header name {k}: {e}")))?;
        let value = HeaderValue::from_str(v)
            .map_err(|e| LoadgenError::Validation(format!("invalid header value for {k}: {e}")))?;
        headers.insert(name, value);
    }
    apply_auth(&mut headers, config.auth.as_ref())?;

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(config.timeouts.connect_ms))
        .timeout(Duration::from_millis(config.timeouts.request_ms))
        .pool_max_idle_per_host(4)
        .build()
        .map_err(LoadgenError::Http)?;

    Ok(Connection {
        client,
        endpoint,
        headers,
        timeouts: config.timeouts.clone(),
        next_id: std::sync::atomic::AtomicI64::new(1),
        initialized: false,
    })
}

fn apply_auth(headers: &mut HeaderMap, auth: Option<&TransportAuth>) -> Result<(), LoadgenError> {
    let Some(auth) = auth else { return Ok(()) };
    let value = match auth {
        TransportAuth::Bearer { tokens } => {
            let token = tokens
                .first()
                .ok_or_else(|| LoadgenError::Validation("bearer auth requires a token".into()))?;
            format!("Bearer {token}")
        }
        TransportAuth::Basic { tokens } => {
            let token = tokens
                .first()
                .ok_or_else(|| LoadgenError::Validation("basic auth requires a token".into()))?;
            format!("Basic {token}")
        }
        TransportAuth::Custom { tokens } => tokens.first().cloned().unwrap_or_default(),
    };
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&value)
            .map_err(|e| LoadgenError::Validation(format!("invalid auth header: {e}")))?,
    );
    Ok(())
}

impl Connection {
    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Sends `initialize` and, on success, `notifications/initialized`.
    /// Per §4.A, every method before this either fails or is simply never
    /// attempted — callers must not call other methods until this returns
    /// `Ok`.
    pub async fn initialize(&mut self) -> Result<(InitializeResult, TransportCallResult), LoadgenError> {
        let params = json!({
            "protocolVersion": protocol::MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "loadgen-worker", "version": env!("CARGO_PKG_VERSION") },
        });
        let (outcome, raw) = self.call_raw("initialize", Some(params)).await;
        let Some(raw) = raw else {
            return Err(self.init_failure(outcome));
        };
        let init: InitializeResult = match serde_json::from_value(raw) {
            Ok(v) => v,
            Err(e) => {
                return Err(LoadgenError::Validation(format!(
                    "malformed initialize result: {e}"
                )))
            }
        };
        self.send_initialized().await?;
        self.initialized = true;
        Ok((init, outcome))
    }

    fn init_failure(&self, outcome: TransportCallResult) -> LoadgenError {
        let message = outcome
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| "initialize failed".to_string());
        LoadgenError::Validation(format!("MCP initialize failed: {message}"))
    }

    async fn send_initialized(&self) -> Result<(), LoadgenError> {
        let req = JsonRpcRequest::notification("notifications/initialized", None);
        self.post(&req).await.map(|_| ()).map_err(LoadgenError::Http)
    }

    pub async fn tools_list(&self) -> TransportCallResult {
        self.call("tools/list", None).await
    }

    pub async fn tools_call(&self, name: &str, arguments: Option<Value>) -> TransportCallResult {
        let mut params = json!({ "name": name });
        if let Some(args) = arguments {
            params["arguments"] = args;
        }
        self.call("tools/call", Some(params)).await
    }

    pub async fn resources_list(&self) -> TransportCallResult {
        self.call("resources/list", None).await
    }

    pub async fn resources_read(&self, uri: &str) -> TransportCallResult {
        self.call("resources/read", Some(json!({ "uri": uri }))).await
    }

    pub async fn prompts_list(&self) -> TransportCallResult {
        self.call("prompts/list", None).await
    }

    pub async fn prompts_get(&self, prompt_name: &str, arguments: Option<Value>) -> TransportCallResult {
        let mut params = json!({ "prompt_name": prompt_name });
        if let Some(args) = arguments {
            params["arguments"] = args;
        }
        self.call("prompts/get", Some(params)).await
    }

    pub async fn ping(&self) -> TransportCallResult {
        self.call("ping", None).await
    }

    /// Subscribes to server-sent notifications. The server is expected to
    /// respond with a `text/event-stream` body rather than a single JSON
    /// object; [`Connection::post`] detects the content type and switches
    /// to [`Connection::read_sse_stream`] to consume it.
    pub async fn subscribe_notifications(&self) -> TransportCallResult {
        self.call("notifications/subscribe", None).await
    }

    pub async fn close(self) {
        // Streamable HTTP has no explicit close handshake; dropping the
        // client releases pooled connections.
    }

    async fn call(&self, method: &str, params: Option<Value>) -> TransportCallResult {
        let (outcome, _) = self.call_raw(method, params).await;
        outcome
    }

    async fn call_raw(&self, method: &str, params: Option<Value>) -> (TransportCallResult, Option<Value>) {
        let id = self.alloc_id();
        let req = JsonRpcRequest::call(id, method, params);
        let bytes_out = serde_json::to_vec(&req).map(|b| b.len() as u64).unwrap_or(0);
        let start = std::time::Instant::now();

        let send_result = tokio::time::timeout(
            Duration::from_millis(self.timeouts.request_ms),
            self.post(&req),
        )
        .await;

        let latency_ms = start.elapsed().as_millis() as u64;

        let send_result = match send_result {
            Ok(r) => r,
            Err(_) => {
                return (
                    TransportCallResult {
                        latency_ms,
                        ok: false,
                        bytes_in: 0,
                        bytes_out,
                        http_status: None,
                        error: Some(TransportError {
                            kind: TransportErrorKind::Timeout,
                            code: "REQUEST_TIMEOUT".to_string(),
                            message: format!("{method} timed out after {}ms", self.timeouts.request_ms),
                        }),
                        result: None,
                        stream: None,
                    },
                    None,
                )
            }
        };

        match send_result {
            Ok(resp) => {
                let http_status = resp.status;
                let bytes_in = resp.body_len as u64;
                match resp.parsed.error {
                    Some(err) => (
                        TransportCallResult {
                            latency_ms,
                            ok: false,
                            bytes_in,
                            bytes_out,
                            http_status: Some(http_status),
                            error: Some(TransportError {
                                kind: TransportErrorKind::Protocol,
                                code: err.code.to_string(),
                                message: err.message,
                            }),
                            result: None,
                            stream: resp.stream,
                        },
                        None,
                    ),
                    None => (
                        TransportCallResult {
                            latency_ms,
                            ok: true,
                            bytes_in,
                            bytes_out,
                            http_status: Some(http_status),
                            error: None,
                            result: resp.parsed.result.clone(),
                            stream: resp.stream,
                        },
                        resp.parsed.result,
                    ),
                }
            }
            Err(e) => {
                let kind = classify_reqwest_error(&e);
                (
                    TransportCallResult {
                        latency_ms,
                        ok: false,
                        bytes_in: 0,
                        bytes_out,
                        http_status: None,
                        error: Some(TransportError {
                            kind,
                            code: "TRANSPORT_ERROR".to_string(),
                            message: e.to_string(),
                        }),
                        result: None,
                        stream: None,
                    },
                    None,
                )
            }
        }
    }

    async fn post(&self, req: &JsonRpcRequest) -> Result<HttpRpcResponse, reqwest::Error> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .json(req)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let is_event_stream = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_event_stream {
            let (parsed, body_len, stream_info) = self.read_sse_stream(resp).await;
            return Ok(HttpRpcResponse {
                status,
                body_len,
                parsed,
                stream: Some(stream_info),
            });
        }

        let body = resp.text().await?;
        let body_len = body.len();
        let parsed: JsonRpcResponse = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(_) => JsonRpcResponse {
                jsonrpc: protocol::JSONRPC_VERSION.to_string(),
                id: None,
                result: None,
                error: Some(protocol::JsonRpcError {
                    code: -32700,
                    message: "invalid JSON response body".to_string(),
                    data: None,
                }),
            },
        };
        Ok(HttpRpcResponse {
            status,
            body_len,
            parsed,
            stream: None,
        })
    }

    /// Reads a `text/event-stream` body event-by-event, declaring a stall
    /// if no chunk arrives within `stream_stall_ms`. The last `data:` frame
    /// received before the stream ends or stalls is parsed as the
    /// terminal JSON-RPC response.
    async fn read_sse_stream(&self, resp: reqwest::Response) -> (JsonRpcResponse, usize, StreamInfo) {
        let mut stream = resp.bytes_stream();
        let mut buf = String::new();
        let mut events_count: u32 = 0;
        let mut body_len: usize = 0;
        let mut last_data: Option<String> = None;
        let mut stalled = false;
        let mut stall_duration_ms = None;
        let stall_timeout = Duration::from_millis(self.timeouts.stream_stall_ms);

        loop {
            match tokio::time::timeout(stall_timeout, stream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    body_len += chunk.len();
                    buf.push_str(&String::from_utf8_lossy(&chunk));
                    for raw_event in drain_complete_events(&mut buf) {
                        events_count += 1;
                        if let Some(data) = last_data_line(&raw_event) {
                            last_data = Some(data);
                        }
                    }
                }
                Ok(Some(Err(_))) => break,
                Ok(None) => break,
                Err(_) => {
                    stalled = true;
                    stall_duration_ms = Some(stall_timeout.as_millis() as u64);
                    break;
                }
            }
        }

        let ended_normally = !stalled;
        let parsed = last_data
            .as_deref()
            .and_then(|d| serde_json::from_str::<JsonRpcResponse>(d).ok())
            .unwrap_or_else(|| JsonRpcResponse {
                jsonrpc: protocol::JSONRPC_VERSION.to_string(),
                id: None,
                result: None,
                error: Some(protocol::JsonRpcError {
                    code: -32000,
                    message: if stalled {
                        "stream stalled before a terminal event arrived".to_string()
                    } else {
                        "stream ended without a terminal JSON-RPC event".to_string()
                    },
                    data: None,
                }),
            });

        let stream_info = StreamInfo {
            is_streaming: true,
            events_count,
            stalled,
            stall_duration_ms,
            ended_normally,
        };

        (parsed, body_len, stream_info)
    }
}

struct HttpRpcResponse {
    status: u16,
    body_len: usize,
    parsed: JsonRpcResponse,
    stream: Option<StreamInfo>,
}

/// Splits complete `\n\n`-terminated SSE event blocks off the front of
/// `buf`, leaving any trailing partial event in place for the next chunk.
fn drain_complete_events(buf: &mut String) -> Vec<String> {
    let mut events = Vec::new();
    while let Some(pos) = buf.find("\n\n") {
        events.push(buf.drain(..pos + 2).collect());
    }
    events
}

/// Extracts the last `data:` line's payload from one SSE event block.
fn last_data_line(raw_event: &str) -> Option<String> {
    raw_event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .last()
        .map(|d| d.trim().to_string())
}

fn classify_reqwest_error(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_rejects_ssrf_violation() {
        let config = TransportConfig {
            endpoint: "http://10.0.0.5/mcp".to_string(),
            headers: Default::default(),
            auth: None,
            allow_private_networks: vec![],
            timeouts: TransportTimeouts::default(),
        };
        let result = connect(&config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn connect_accepts_loopback_target() {
        let config = TransportConfig {
            endpoint: "http://127.0.0.1:9/mcp".to_string(),
            headers: Default::default(),
            auth: None,
            allow_private_networks: vec![],
            timeouts: TransportTimeouts::default(),
        };
        let result = connect(&config).await;
        assert!(result.is_ok());
    }

    #[test]
    fn bearer_auth_sets_authorization_header() {
        let mut headers = HeaderMap::new();
        apply_auth(
            &mut headers,
            Some(&TransportAuth::Bearer {
                tokens: vec!["tok123".to_string()],
            }),
        )
        .unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok123");
    }

    #[test]
    fn no_auth_leaves_headers_untouched() {
        let mut headers = HeaderMap::new();
        apply_auth(&mut headers, None).unwrap();
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn bearer_auth_without_tokens_is_rejected() {
        let mut headers = HeaderMap::new();
        let result = apply_auth(&mut headers, Some(&TransportAuth::Bearer { tokens: vec![] }));
        assert!(result.is_err());
    }

    #[test]
    fn timeout_kind_maps_to_operation_error_type() {
        let mapped: OperationErrorType = TransportErrorKind::Timeout.into();
        assert_eq!(mapped, OperationErrorType::Timeout);
    }

    #[test]
    fn drain_complete_events_leaves_a_trailing_partial_event_buffered() {
        let mut buf = "data: {\"a\":1}\n\ndata: {\"a\":2}\n\ndata: parti".to_string();
        let events = drain_complete_events(&mut buf);
        assert_eq!(events.len(), 2);
        assert_eq!(buf, "data: parti");
    }

    #[test]
    fn drain_complete_events_on_empty_buffer_yields_nothing() {
        let mut buf = String::new();
        assert!(drain_complete_events(&mut buf).is_empty());
    }

    #[test]
    fn last_data_line_extracts_the_final_data_field() {
        let event = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n";
        let data = last_data_line(event).unwrap();
        assert_eq!(data, "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}");
    }

    #[test]
    fn last_data_line_returns_none_without_a_data_field() {
        assert!(last_data_line(": keepalive\n").is_none());
    }

    #[test]
    fn last_data_line_prefers_the_last_of_multiple_data_lines() {
        let event = "data: first\ndata: second\n";
        assert_eq!(last_data_line(event).unwrap(), "second");
    }

    /// A stream that closes cleanly with no `data:` frames at all (the
    /// zero-event boundary from §8) must still report `ended_normally`;
    /// only a stall should flip that flag.
    #[tokio::test]
    async fn read_sse_stream_zero_events_ends_normally() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        let client = reqwest::Client::new();
        let resp = client.get(format!("http://{addr}/events")).send().await.unwrap();

        let connection = Connection {
            client,
            endpoint: url::Url::parse(&format!("http://{addr}/mcp")).unwrap(),
            headers: HeaderMap::new(),
            timeouts: TransportTimeouts::default(),
            next_id: std::sync::atomic::AtomicI64::new(1),
            initialized: false,
        };

        let (_parsed, body_len, stream_info) = connection.read_sse_stream(resp).await;
        assert_eq!(body_len, 0);
        assert_eq!(stream_info.events_count, 0);
        assert!(!stream_info.stalled);
        assert!(stream_info.ended_normally);
    }
}

//! Ad hoc target probing — §6. `/test-connection` and `/discover-tools`
//! open a throwaway [`Connection`], make one call, and report back; neither
//! endpoint touches run or worker state.

use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use loadgen_core::transport::{self, TransportConfig};

#[derive(Debug, Deserialize)]
pub struct TestConnectionRequest {
    pub target: TransportConfig,
}

#[derive(Debug, Serialize)]
pub struct TestConnectionResponse {
    pub ok: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

pub async fn test_connection(Json(body): Json<TestConnectionRequest>) -> Json<TestConnectionResponse> {
    match transport::connect(&body.target).await {
        Ok(conn) => {
            let result = conn.ping().await;
            Json(TestConnectionResponse {
                ok: result.ok,
                latency_ms: result.latency_ms,
                error: result.error.map(|e| e.message),
            })
        }
        Err(err) => Json(TestConnectionResponse {
            ok: false,
            latency_ms: 0,
            error: Some(err.to_string()),
        }),
    }
}

#[derive(Debug, Deserialize)]
pub struct DiscoverToolsRequest {
    pub target: TransportConfig,
}

#[derive(Debug, Serialize)]
pub struct DiscoverToolsResponse {
    pub ok: bool,
    pub tools: Option<Value>,
    pub error: Option<String>,
}

pub async fn discover_tools(Json(body): Json<DiscoverToolsRequest>) -> Json<DiscoverToolsResponse> {
    match transport::connect(&body.target).await {
        Ok(mut conn) => {
            if let Err(err) = conn.initialize().await {
                return Json(DiscoverToolsResponse {
                    ok: false,
                    tools: None,
                    error: Some(err.to_string()),
                });
            }
            let result = conn.tools_list().await;
            Json(DiscoverToolsResponse {
                ok: result.ok,
                tools: result.result,
                error: result.error.map(|e| e.message),
            })
        }
        Err(err) => Json(DiscoverToolsResponse {
            ok: false,
            tools: None,
            error: Some(err.to_string()),
        }),
    }
}

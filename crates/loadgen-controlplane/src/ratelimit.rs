//! HTTP rate limiting — §4.J / §7. Keyed per-user (the authenticated
//! principal's subject) when available, else per-IP, reusing the VU
//! engine's [`TokenBucket`] rather than inventing a second limiter
//! implementation for the control plane.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::sync::Mutex;

use loadgen_core::engine::TokenBucket;

use crate::auth::Principal;

pub struct RateLimiter {
    rps: f64,
    burst: f64,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(rps: f64, burst: f64) -> Self {
        RateLimiter {
            rps,
            burst,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    async fn try_acquire(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| TokenBucket::new(self.rps, self.burst));
        bucket.try_acquire()
    }
}

pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    let key = req
        .extensions()
        .get::<Principal>()
        .map(|p| p.subject.clone())
        .unwrap_or_else(|| addr.ip().to_string());

    if limiter.try_acquire(&key).await {
        next.run(req).await
    } else {
        let mut resp = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "rate limit exceeded", "code": "RATE_LIMITED"})),
        )
            .into_response();
        let headers = resp.headers_mut();
        headers.insert("Retry-After", HeaderValue::from_static("1"));
        headers.insert("X-RateLimit-Limit", HeaderValue::from_str(&(limiter.burst as u64).to_string()).unwrap());
        headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
        resp
    }
}

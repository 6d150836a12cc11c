//! Auth middleware — §4.J / §6. Three modes (`none`, `api_key`, `jwt`),
//! the same "decode, build a principal, stash it in request extensions"
//! shape the donor control-plane's `jwt_auth` middleware uses, generalized
//! to cover all three modes behind one layer instead of a JWT-only one.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub subject: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    None,
    ApiKey,
    Jwt,
}

impl AuthMode {
    pub fn from_env(raw: &str) -> Self {
        match raw {
            "api_key" => AuthMode::ApiKey,
            "jwt" => AuthMode::Jwt,
            _ => AuthMode::None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    sub: String,
    #[serde(default = "default_role")]
    role: Role,
}

fn default_role() -> Role {
    Role::Viewer
}

pub struct AuthConfig {
    pub mode: AuthMode,
    pub api_keys: Vec<String>,
    pub decoding_key: Option<DecodingKey>,
    pub validation: Validation,
}

impl AuthConfig {
    pub fn none() -> Self {
        AuthConfig {
            mode: AuthMode::None,
            api_keys: Vec::new(),
            decoding_key: None,
            validation: Validation::default(),
        }
    }

    pub fn api_key(keys: Vec<String>) -> Self {
        AuthConfig {
            mode: AuthMode::ApiKey,
            api_keys: keys,
            decoding_key: None,
            validation: Validation::default(),
        }
    }

    pub fn jwt(secret: &[u8]) -> Self {
        let mut validation = Validation::default();
        validation.required_spec_claims.clear();
        AuthConfig {
            mode: AuthMode::Jwt,
            api_keys: Vec::new(),
            decoding_key: Some(DecodingKey::from_secret(secret)),
            validation,
        }
    }
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": message, "code": "UNAUTHORIZED"}))).into_response()
}

/// Authenticates a request per the configured mode, injecting a
/// [`Principal`] into its extensions. `none` injects an implicit admin
/// principal so downstream role checks never special-case it.
pub async fn authenticate(State(config): State<Arc<AuthConfig>>, mut req: Request, next: Next) -> Response {
    match config.mode {
        AuthMode::None => {
            req.extensions_mut().insert(Principal {
                subject: "anonymous".to_string(),
                role: Role::Admin,
            });
        }
        AuthMode::ApiKey => {
            let provided = req
                .headers()
                .get("X-API-Key")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            match provided {
                Some(key) if config.api_keys.iter().any(|k| k == &key) => {
                    req.extensions_mut().insert(Principal {
                        subject: key,
                        role: Role::Operator,
                    });
                }
                _ => return unauthorized("missing or invalid X-API-Key"),
            }
        }
        AuthMode::Jwt => {
            let Some(decoding_key) = &config.decoding_key else {
                return unauthorized("jwt auth not configured");
            };
            let Some(token) = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
            else {
                return unauthorized("missing bearer token");
            };
            let claims = match decode::<JwtClaims>(token, decoding_key, &config.validation) {
                Ok(data) => data.claims,
                Err(e) => return unauthorized(&format!("invalid token: {e}")),
            };
            req.extensions_mut().insert(Principal {
                subject: claims.sub,
                role: claims.role,
            });
        }
    }
    next.run(req).await
}

/// Compares two strings in time independent of where they first differ.
/// Worker tokens are bearer secrets, not hashed, so a naive `==` would leak
/// timing information about how many leading bytes matched.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Role-gating middleware for mutating endpoints: `viewer` may only read.
pub async fn require_operator(req: Request, next: Next) -> Response {
    match req.extensions().get::<Principal>() {
        Some(p) if matches!(p.role, Role::Admin | Role::Operator) => next.run(req).await,
        Some(_) => (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "operator or admin role required", "code": "FORBIDDEN"})),
        )
            .into_response(),
        None => unauthorized("no principal on request"),
    }
}

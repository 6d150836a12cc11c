use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportAuth {
    Bearer { tokens: Vec<String> },
    Basic { tokens: Vec<String> },
    Custom { tokens: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportTimeouts {
    pub connect_ms: u64,
    pub request_ms: u64,
    pub stream_stall_ms: u64,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        TransportTimeouts {
            connect_ms: 10_000,
            request_ms: 30_000,
            stream_stall_ms: 15_000,
        }
    }
}

/// Configuration enumerated exactly by §4.A: `endpoint`, optional `headers`,
/// optional `auth`, an `allow_private_networks` CIDR allowlist (default
/// disabled), and `timeouts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub endpoint: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub auth: Option<TransportAuth>,
    #[serde(default)]
    pub allow_private_networks: Vec<String>,
    #[serde(default)]
    pub timeouts: TransportTimeouts,
}

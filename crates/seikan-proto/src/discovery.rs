//! HTTP probe documents
//!
//! Clients pick a mediator by fetching `GET /seikan-api` and comparing the
//! major component of the advertised version with their own.

use serde::{Deserialize, Serialize};

/// Liveness probe path
pub const PROBE_PATH: &str = "/seikan-api";

/// Status document path
pub const STATUS_PATH: &str = "/seikan-api/status";

/// WebSocket endpoint path
pub const WS_PATH: &str = "/seikan-api/ws";

/// Liveness probe response
///
/// Returned from `GET /seikan-api`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResponse {
    /// `<major>.<minor>.<patch>`
    pub version: String,
}

impl Default for ProbeResponse {
    fn default() -> Self {
        Self {
            version: super::PROTOCOL_VERSION.to_string(),
        }
    }
}

impl ProbeResponse {
    /// Major component of the advertised version, if it parses
    pub fn major(&self) -> Option<u64> {
        self.version.split('.').next()?.trim().parse().ok()
    }

    /// Whether a client speaking `client_major` can use this mediator
    pub fn is_compatible_with(&self, client_major: u64) -> bool {
        self.major() == Some(client_major)
    }
}

/// Mediator status
///
/// Returned from `GET /seikan-api/status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    /// Tunnels created but not yet joined
    pub waiting_tunnels: usize,
    /// Tunnels with both sides attached
    pub active_tunnels: usize,
}

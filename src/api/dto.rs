//! Data Transfer Objects
//!
//! Response types for the HTTP endpoints.

use serde::Serialize;

/// Full health status
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy" while the broker runs, "stopped" afterwards
    pub status: String,
    /// Live WebSocket sessions
    pub ws_clients: usize,
    pub uptime_seconds: u64,
    pub version: String,
}

/// Publish acknowledgement
#[derive(Debug, Serialize)]
pub struct PublishResponse {
    /// Always "accepted": delivery is asynchronous and best-effort
    pub status: String,
    /// Channel the event was published on
    pub channel: String,
}

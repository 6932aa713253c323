//! Admin `/health` body.

use std::time::Instant;

use serde::Serialize;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the process serves requests.
    pub status: &'static str,
    /// Seconds since startup.
    pub uptime_secs: u64,
    /// Tokens owned on this instance.
    pub connections: usize,
    /// Active notifier backend.
    pub notifier: &'static str,
}

impl HealthResponse {
    /// Snapshot the live counters.
    pub fn snapshot(start_time: Instant, connections: usize, notifier: &'static str) -> Self {
        Self {
            status: "ok",
            uptime_secs: start_time.elapsed().as_secs(),
            connections,
            notifier,
        }
    }
}

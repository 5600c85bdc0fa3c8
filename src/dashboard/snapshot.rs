//! Read-only view of the pool for the introspection endpoint.

use crate::pool::BackendPool;
use serde::Serialize;

/// Point-in-time counters for one distinct backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub name: String,
    pub url: String,
    pub alive: bool,
    pub active_connections: i64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: u64,
}

impl BackendSnapshot {
    /// Failed share of total requests, as a percentage.
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64 * 100.0
        }
    }
}

/// Snapshot every distinct backend, deduplicated by URL.
///
/// Counter loads are individually atomic; the snapshot as a whole is
/// not transactional, which is fine for a monitoring view.
pub fn snapshot(pool: &BackendPool) -> Vec<BackendSnapshot> {
    pool.backends()
        .iter()
        .map(|backend| BackendSnapshot {
            name: backend.name.clone(),
            url: backend.url.to_string(),
            alive: backend.is_alive(),
            active_connections: backend.active_connections(),
            total_requests: backend.total_requests(),
            failed_requests: backend.failed_requests(),
            consecutive_failures: backend.consecutive_failures(),
        })
        .collect()
}

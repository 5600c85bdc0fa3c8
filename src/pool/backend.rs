//! Per-origin backend record.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use url::Url;

/// A single upstream origin server.
///
/// The liveness flag sits behind a readers-writer lock: it is read on
/// every selection and written only on health transitions (the prober
/// every sweep, the breaker and dispatcher on failure). The counters are
/// plain atomics and never take the lock.
#[derive(Debug)]
pub struct Backend {
    /// Display label.
    pub name: String,
    /// Origin base URL (scheme, host, port).
    pub url: Url,
    alive: RwLock<bool>,
    active_connections: AtomicI64,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    consecutive_failures: AtomicU64,
}

impl Backend {
    /// Create a backend. New backends start alive; the first probe sweep
    /// corrects that if the origin is unreachable.
    pub fn new(name: String, url: Url) -> Self {
        Self {
            name,
            url,
            alive: RwLock::new(true),
            active_connections: AtomicI64::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
        }
    }

    pub fn set_alive(&self, alive: bool) {
        *self.alive.write().unwrap_or_else(PoisonError::into_inner) = alive;
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Count one forwarded request against this backend.
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one failed exchange against this backend.
    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Extend the 5xx streak; returns the new streak length.
    pub fn record_server_error(&self) -> u64 {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// End the 5xx streak.
    pub fn reset_server_errors(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Count a request in: bumps `total_requests` and holds one
    /// `active_connections` slot until the returned guard drops.
    pub fn begin_request(self: &Arc<Self>) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.record_request();
        ConnectionGuard {
            backend: Arc::clone(self),
        }
    }
}

/// Scoped accounting for one in-flight request.
///
/// Created by [`Backend::begin_request`]; the matching decrement fires
/// when the guard drops, on every exit path including panics. The retry
/// path reuses the guard of the originally selected backend and never
/// creates a second one for the replacement.
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
    }
}

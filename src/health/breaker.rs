//! Passive circuit breaker fed by response status codes.
//!
//! TCP probes cannot see application-layer failure (the process is up,
//! the app is broken), so the breaker watches forwarded responses and
//! kills a backend that keeps answering 5xx. Recovery always goes
//! through the prober.

use crate::pool::BackendPool;
use std::sync::Arc;
use tracing::warn;

/// Consecutive 5xx responses that take a backend down.
pub const TRIP_THRESHOLD: u64 = 3;

/// Observes response statuses keyed by origin URL.
#[derive(Clone)]
pub struct Breaker {
    pool: Arc<BackendPool>,
}

impl Breaker {
    pub fn new(pool: Arc<BackendPool>) -> Self {
        Self { pool }
    }

    /// Record the status of a response attributed to `url`.
    ///
    /// A 5xx extends the backend's failure streak and kills it once the
    /// streak reaches the threshold; anything below 500 resets the
    /// streak. Liveness is never written back to true here.
    pub fn observe(&self, url: &str, status: u16) {
        let Some(backend) = self.pool.get_by_url(url) else {
            return;
        };

        if status >= 500 {
            let streak = backend.record_server_error();
            if streak >= TRIP_THRESHOLD {
                warn!(
                    backend = %backend.name,
                    url = %backend.url,
                    streak,
                    "circuit breaker tripped, marking backend down"
                );
                backend.set_alive(false);
            }
        } else {
            backend.reset_server_errors();
        }
    }
}

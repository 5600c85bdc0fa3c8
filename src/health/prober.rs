//! Active health prober.
//!
//! Periodically dials every backend over TCP and writes liveness from
//! the result. This is the only place a dead backend can come back:
//! the breaker and the dispatcher may only kill.

use crate::pool::BackendPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How often the probe sweep runs.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(20);

/// Dial timeout for a single probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Periodic TCP-reachability prober.
pub struct Prober {
    pool: Arc<BackendPool>,
}

impl Prober {
    pub fn new(pool: Arc<BackendPool>) -> Self {
        Self { pool }
    }

    /// Run the probe loop until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = PROBE_INTERVAL.as_secs(),
            "health prober starting"
        );

        let mut tick = interval(PROBE_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.sweep().await;
                }

                _ = shutdown.recv() => {
                    info!("health prober shutting down");
                    break;
                }
            }
        }
    }

    /// Probe every backend once, in configuration order.
    pub async fn sweep(&self) {
        debug!("starting health sweep");

        for backend in self.pool.backends() {
            let alive = probe(&backend.url).await;
            backend.set_alive(alive);

            info!(
                backend = %backend.name,
                url = %backend.url,
                status = if alive { "up" } else { "down" },
                "probe result"
            );
        }

        debug!("health sweep completed");
    }
}

/// Dial the origin's host:port with a short timeout.
///
/// Any error, including timeout, counts as unreachable.
pub async fn probe(url: &url::Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let Some(port) = url.port_or_known_default() else {
        return false;
    };

    match timeout(PROBE_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            warn!(url = %url, error = %e, "probe dial failed");
            false
        }
        Err(_) => {
            warn!(url = %url, "probe dial timed out");
            false
        }
    }
}

//! Short per-request identifiers for log correlation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique request id, cheap enough to mint on the request path.
#[derive(Clone, Debug)]
pub struct RequestId(u64);

impl RequestId {
    /// Mint the next id.
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{:08x}", self.0)
    }
}

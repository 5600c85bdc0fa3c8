//! Ordered slot pool with the two selection policies.

use crate::pool::Backend;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Ordered collection of backend slots.
///
/// A backend with weight `w` occupies `w` consecutive slots, so the
/// round-robin cursor visits it `w` times per cycle. Distinct backends
/// (deduplicated by URL) are kept separately in first-seen order for
/// least-connections selection, URL lookup, and snapshots.
///
/// The slot list is built once at startup and read-only afterwards;
/// selection needs no lock beyond each backend's own liveness flag.
pub struct BackendPool {
    slots: Vec<Arc<Backend>>,
    distinct: Vec<Arc<Backend>>,
    cursor: AtomicU64,
}

impl BackendPool {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            distinct: Vec::new(),
            cursor: AtomicU64::new(0),
        }
    }

    /// Append `weight` slots referencing `backend`. Startup only.
    pub fn add(&mut self, backend: Arc<Backend>, weight: u32) {
        if !self
            .distinct
            .iter()
            .any(|b| b.url.as_str() == backend.url.as_str())
        {
            self.distinct.push(Arc::clone(&backend));
        }
        for _ in 0..weight.max(1) {
            self.slots.push(Arc::clone(&backend));
        }
    }

    /// Distinct backends in configuration order.
    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.distinct
    }

    /// Total slot count, weights included.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Find a distinct backend by URL string equality.
    pub fn get_by_url(&self, url: &str) -> Option<Arc<Backend>> {
        self.distinct
            .iter()
            .find(|b| b.url.as_str() == url)
            .cloned()
    }

    /// Locate a backend by URL and write its liveness.
    pub fn mark_status(&self, url: &str, alive: bool) {
        if let Some(backend) = self.get_by_url(url) {
            backend.set_alive(alive);
        }
    }

    /// Weighted round-robin: advance the cursor and return the first
    /// live slot, scanning at most one full cycle.
    ///
    /// When dead slots were skipped, the cursor is stored back to the
    /// returned index so later calls do not rescan the dead region.
    /// Concurrent callers may clobber that store; fairness degrades
    /// statistically but every live slot is still eventually covered.
    pub fn next_round_robin(&self) -> Option<Arc<Backend>> {
        let len = self.slots.len() as u64;
        if len == 0 {
            return None;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(1) % len;

        for offset in 0..len {
            let idx = (start + offset) % len;
            let slot = &self.slots[idx as usize];

            if slot.is_alive() {
                if offset != 0 {
                    self.cursor.store(idx, Ordering::Relaxed);
                }
                return Some(Arc::clone(slot));
            }
        }

        None
    }

    /// Least-connections: the live backend with the fewest active
    /// connections, ties broken by first-seen order.
    ///
    /// Iterates distinct backends, so slot duplication (weights) does
    /// not skew the choice.
    pub fn next_least_connections(&self) -> Option<Arc<Backend>> {
        let mut best: Option<&Arc<Backend>> = None;
        let mut min_conns = 0;

        for backend in &self.distinct {
            if !backend.is_alive() {
                continue;
            }

            let conns = backend.active_connections();
            if best.is_none() || conns < min_conns {
                best = Some(backend);
                min_conns = conns;
            }
        }

        best.cloned()
    }
}

impl Default for BackendPool {
    fn default() -> Self {
        Self::new()
    }
}

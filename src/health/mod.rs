//! Backend health: active TCP probing and the passive circuit breaker.

mod breaker;
mod prober;

pub use breaker::{Breaker, TRIP_THRESHOLD};
pub use prober::{probe, Prober, PROBE_INTERVAL, PROBE_TIMEOUT};

//! Introspection: read-only pool snapshots and the dashboard server.

mod server;
mod snapshot;

pub use server::{DashboardServer, DASHBOARD_PORT};
pub use snapshot::{snapshot, BackendSnapshot};

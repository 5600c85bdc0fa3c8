//! Backend records and the slot pool with its selection policies.

mod backend;
mod pool;

pub use backend::{Backend, ConnectionGuard};
pub use pool::BackendPool;

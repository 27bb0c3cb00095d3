//! Session pool — ownership and lifecycle of per-user automated surfaces.

pub mod pool;

pub use pool::{PoolStats, SessionPool, SessionView};

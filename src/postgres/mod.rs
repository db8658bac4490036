//! Read-only view of the relational store, used for stats gauges only.

mod pool;

pub use pool::{PostgresPool, PostgresPoolError};

//! Data access layer: entities, the store abstraction, and backends.

#[cfg(feature = "memory-store")]
pub mod memory;
pub mod models;
pub mod storage;
pub mod store;

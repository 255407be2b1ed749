//! Durable ranked item storage.
//!
//! - [`sql::SqlStore`]: PostgreSQL or SQLite through the sqlx `Any` driver
//! - [`memory::InMemoryStore`]: in-process table with the same lock discipline

pub mod traits;
pub mod sql;
pub mod memory;

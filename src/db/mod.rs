//! Database access layer.
//!
//! This module provides:
//! - Engine adapters over single sqlx connections
//! - The connection lifecycle manager (lazy open, keep-alive, idle timeout)
//! - The query executor wrapping every operation in that lifecycle
//! - Row to JSON conversion
//! - Runtime engine dispatch

pub mod any;
pub mod engine;
pub mod executor;
pub mod lifecycle;
#[macro_use]
pub mod macros;
pub mod params;
pub mod types;

pub use any::{AnyDbWrapper, JsonRow};
pub use engine::{EngineAdapter, MySqlEngine, PostgresEngine, SqliteEngine};
pub use executor::DbWrapper;
pub use lifecycle::{ConnectionLifecycle, ConnectionState};
pub use types::RowToJson;

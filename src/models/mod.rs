//! Data models for the database wrapper.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    ConfigError, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_IDLE_TIMEOUT_MS, DatabaseType,
    WrapperConfig, mask_url,
};
pub use query::{
    Command, FieldFilter, Parameter, QueryParam, StatementKind, ToParams, params_from_serialize,
};

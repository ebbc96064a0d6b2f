//! Database Wrapper Library
//!
//! One connection per wrapper, opened lazily and either kept alive behind an idle
//! timer or closed after every operation. Callers run SELECT / INSERT / UPDATE /
//! DELETE through [`DbWrapper`] without engine-specific code; failures go to a
//! pluggable [`ErrorReporter`].

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod reporter;

pub use config::Config;
pub use db::{AnyDbWrapper, ConnectionState, DbWrapper, EngineAdapter, RowToJson};
pub use error::{DbError, DbResult, FailureKind};
pub use models::{
    Command, DatabaseType, FieldFilter, Parameter, QueryParam, StatementKind, ToParams,
    WrapperConfig,
};
pub use reporter::ErrorReporter;

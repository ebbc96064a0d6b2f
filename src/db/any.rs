//! Engine chosen at runtime.
//!
//! [`DbWrapper`] is generic over its engine. When the engine is only known from
//! configuration (a URL, a CLI flag), [`AnyDbWrapper`] picks the right one and
//! exposes the engine-independent part of the API, with rows as JSON objects.

use crate::db::engine::{MySqlEngine, PostgresEngine, SqliteEngine};
use crate::db::executor::DbWrapper;
use crate::db::lifecycle::ConnectionState;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::impl_engine_dispatch;
use crate::models::{Command, ConfigError, DatabaseType, Parameter, WrapperConfig};
use serde_json::{Map, Value as JsonValue};

/// A JSON object keyed by column name.
pub type JsonRow = Map<String, JsonValue>;

#[derive(Debug)]
pub enum AnyDbWrapper {
    MySql(DbWrapper<MySqlEngine>),
    Postgres(DbWrapper<PostgresEngine>),
    SQLite(DbWrapper<SqliteEngine>),
}

impl AnyDbWrapper {
    pub fn new(db_type: DatabaseType, config: WrapperConfig) -> Self {
        match db_type {
            DatabaseType::MySQL => Self::MySql(DbWrapper::mysql(config)),
            DatabaseType::PostgreSQL => Self::Postgres(DbWrapper::postgres(config)),
            DatabaseType::SQLite => Self::SQLite(DbWrapper::sqlite(config)),
        }
    }

    /// Build a wrapper from a connection URL. See [`WrapperConfig::from_url`].
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        let (db_type, config) = WrapperConfig::from_url(url)?;
        Ok(Self::new(db_type, config))
    }

    pub fn database_type(&self) -> DatabaseType {
        impl_engine_dispatch!(self, {
            MySql(_w) => DatabaseType::MySQL,
            Postgres(_w) => DatabaseType::PostgreSQL,
            SQLite(_w) => DatabaseType::SQLite,
        })
    }

    pub fn config(&self) -> &WrapperConfig {
        impl_engine_dispatch!(self, w => w.config())
    }

    pub fn masked_connection_string(&self) -> String {
        impl_engine_dispatch!(self, w => w.masked_connection_string())
    }

    pub async fn open(&self) {
        impl_engine_dispatch!(self, w => w.open().await)
    }

    pub async fn close(&self) {
        impl_engine_dispatch!(self, w => w.close().await)
    }

    pub async fn is_open(&self) -> bool {
        impl_engine_dispatch!(self, w => w.is_open().await)
    }

    pub async fn state(&self) -> ConnectionState {
        impl_engine_dispatch!(self, w => w.state().await)
    }

    pub fn set_error_reporter<F>(&self, sink: F)
    where
        F: Fn(&DbError) + Send + Sync + 'static,
    {
        impl_engine_dispatch!(self, w => w.set_error_reporter(sink))
    }

    pub fn set_error_reporting(&self, enabled: bool) {
        impl_engine_dispatch!(self, w => w.set_error_reporting(enabled))
    }

    /// All rows as JSON objects. Empty on failure.
    pub async fn select_json(
        &self,
        query: &str,
        params: impl IntoIterator<Item = Parameter>,
        decode_binary: bool,
    ) -> Vec<JsonRow> {
        let params: Vec<Parameter> = params.into_iter().collect();
        impl_engine_dispatch!(self, w => {
            w.select_list_with(query, params, |row| {
                Ok(row.to_json_map_with_options(decode_binary))
            })
            .await
        })
    }

    pub async fn try_select_json(
        &self,
        command: &Command,
        decode_binary: bool,
    ) -> DbResult<Vec<JsonRow>> {
        impl_engine_dispatch!(self, w => {
            w.try_select_list(command, |row| Ok(row.to_json_map_with_options(decode_binary)))
                .await
        })
    }

    /// Run a non-query statement. Returns the affected-row count, 0 on failure.
    pub async fn execute(&self, query: &str, params: impl IntoIterator<Item = Parameter>) -> u64 {
        let command = Command::new(query).bind_all(params);
        self.try_execute(&command).await.unwrap_or(0)
    }

    pub async fn try_execute(&self, command: &Command) -> DbResult<u64> {
        impl_engine_dispatch!(self, w => w.try_execute(command).await)
    }
}

//! SQLite adapter.
//!
//! Server address, port and credentials are ignored; `db_name` is the database
//! file path (created on first open) or `:memory:`. An in-memory database lives
//! only as long as its connection, so it is usually paired with keep-alive.

use super::{EngineAdapter, collect_rows, connect_error};
use crate::db::params::sqlite_query;
use crate::error::{DbError, DbResult};
use crate::models::{Command, DatabaseType, WrapperConfig};
use futures_util::StreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{ConnectOptions, Connection, Executor};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteEngine;

impl EngineAdapter for SqliteEngine {
    type Connection = SqliteConnection;
    type Row = SqliteRow;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn build_connection_string(&self, config: &WrapperConfig) -> String {
        format!("sqlite:{}", config.db_name)
    }

    async fn open_connection(&self, connection_string: &str) -> DbResult<SqliteConnection> {
        let options = SqliteConnectOptions::from_str(connection_string)
            .map_err(|e| {
                DbError::connection(
                    format!("Invalid SQLite connection string: {}", e),
                    "Use a file path or :memory: as the database name",
                )
            })?
            .create_if_missing(true);

        options
            .connect()
            .await
            .map_err(|e| connect_error(DatabaseType::SQLite, e))
    }

    async fn close_connection(&self, connection: SqliteConnection) -> DbResult<()> {
        connection.close().await.map_err(DbError::from)
    }

    async fn fetch_rows(
        &self,
        connection: &mut SqliteConnection,
        command: &Command,
        limit: Option<usize>,
    ) -> DbResult<Vec<SqliteRow>> {
        let fetch_limit = limit.unwrap_or(usize::MAX);
        let results = if command.params().is_empty() {
            connection
                .fetch(command.sql())
                .take(fetch_limit)
                .collect::<Vec<_>>()
                .await
        } else {
            sqlite_query(command)
                .fetch(&mut *connection)
                .take(fetch_limit)
                .collect::<Vec<_>>()
                .await
        };
        collect_rows(results)
    }

    async fn execute(&self, connection: &mut SqliteConnection, command: &Command) -> DbResult<u64> {
        let result = if command.params().is_empty() {
            connection.execute(command.sql()).await
        } else {
            sqlite_query(command).execute(&mut *connection).await
        };
        Ok(result.map_err(DbError::from)?.rows_affected())
    }
}

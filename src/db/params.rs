//! Statement building for the engine adapters.
//!
//! A [`Command`] is turned into a prepared sqlx query with its parameters bound
//! positionally, in command order. Parameter names never reach the driver.

use crate::models::{Command, QueryParam};
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};

pub(crate) type MySqlQuery<'q> = Query<'q, MySql, MySqlArguments>;
pub(crate) type PgQuery<'q> = Query<'q, Postgres, PgArguments>;
pub(crate) type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Prepared MySQL statement for `command`.
pub(crate) fn mysql_query(command: &Command) -> MySqlQuery<'_> {
    command
        .params()
        .iter()
        .fold(sqlx::query(command.sql()), |query, param| match &param.value {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
            QueryParam::Json(v) => query.bind(Json(v)),
        })
}

/// Prepared PostgreSQL statement for `command`.
pub(crate) fn postgres_query(command: &Command) -> PgQuery<'_> {
    command
        .params()
        .iter()
        .fold(sqlx::query(command.sql()), |query, param| match &param.value {
            // Untyped NULL; the server infers the column type.
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
            QueryParam::Json(v) => query.bind(Json(v)),
        })
}

/// Prepared SQLite statement for `command`.
pub(crate) fn sqlite_query(command: &Command) -> SqliteQuery<'_> {
    command
        .params()
        .iter()
        .fold(sqlx::query(command.sql()), |query, param| match &param.value {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
            // Stored as JSON text
            QueryParam::Json(v) => query.bind(v.to_string()),
        })
}

//! Query execution.
//!
//! [`DbWrapper`] wraps every data operation in the same envelope:
//!
//! 1. lock the connection slot and open the connection if needed
//! 2. build the command and bind its parameters
//! 3. execute and decode the rows
//! 4. run the keep-alive check (reset the idle timer, or close the connection)
//! 5. report a failure once, after the connection slot is released
//!
//! The plain operations (`select_one`, `insert`, ...) never return errors: a
//! failure is reported and the zero value comes back (`T::default()`, an empty
//! list, or `0` affected rows). The `try_*` operations run the same envelope and
//! also hand the error back.

use crate::db::engine::{EngineAdapter, MySqlEngine, PostgresEngine, SqliteEngine};
use crate::db::lifecycle::{ConnectionLifecycle, ConnectionState};
use crate::error::{DbError, DbResult};
use crate::models::{
    Command, FieldFilter, Parameter, StatementKind, ToParams, WrapperConfig, params_from_serialize,
};
use serde::Serialize;
use std::time::Instant;
use tracing::debug;

/// Engine-agnostic database access over a single lazily opened connection.
pub struct DbWrapper<A: EngineAdapter> {
    lifecycle: ConnectionLifecycle<A>,
}

impl DbWrapper<MySqlEngine> {
    pub fn mysql(config: WrapperConfig) -> Self {
        Self::new(MySqlEngine, config)
    }
}

impl DbWrapper<PostgresEngine> {
    pub fn postgres(config: WrapperConfig) -> Self {
        Self::new(PostgresEngine, config)
    }
}

impl DbWrapper<SqliteEngine> {
    pub fn sqlite(config: WrapperConfig) -> Self {
        Self::new(SqliteEngine, config)
    }
}

impl<A: EngineAdapter> DbWrapper<A> {
    /// Create a wrapper. Does not connect; the first operation (or [`open`](Self::open)) does.
    pub fn new(adapter: A, config: WrapperConfig) -> Self {
        Self {
            lifecycle: ConnectionLifecycle::new(adapter, config),
        }
    }

    pub fn lifecycle(&self) -> &ConnectionLifecycle<A> {
        &self.lifecycle
    }

    pub fn config(&self) -> &WrapperConfig {
        self.lifecycle.config()
    }

    /// Connection string with the password masked.
    pub fn masked_connection_string(&self) -> String {
        self.lifecycle.masked_connection_string()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub async fn open(&self) {
        self.lifecycle.open().await;
    }

    pub async fn close(&self) {
        self.lifecycle.close().await;
    }

    pub async fn is_open(&self) -> bool {
        self.lifecycle.is_open().await
    }

    pub async fn state(&self) -> ConnectionState {
        self.lifecycle.state().await
    }

    // =========================================================================
    // Error reporting
    // =========================================================================

    /// Replace the sink that receives reported failures.
    pub fn set_error_reporter<F>(&self, sink: F)
    where
        F: Fn(&DbError) + Send + Sync + 'static,
    {
        self.lifecycle.reporter().set_sink(sink);
    }

    pub fn set_error_reporting(&self, enabled: bool) {
        self.lifecycle.reporter().set_enabled(enabled);
    }

    pub fn is_error_reporting(&self) -> bool {
        self.lifecycle.reporter().is_enabled()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch at most one row and decode it.
    ///
    /// Returns `T::default()` when there is no row or on failure. A second row is
    /// a contract violation.
    pub async fn select_one<T, F>(&self, query: &str, decode: F) -> T
    where
        T: Default,
        F: FnMut(&A::Row) -> DbResult<T>,
    {
        self.select_one_with(query, Vec::new(), decode).await
    }

    pub async fn select_one_with<T, F>(
        &self,
        query: &str,
        params: impl IntoIterator<Item = Parameter>,
        decode: F,
    ) -> T
    where
        T: Default,
        F: FnMut(&A::Row) -> DbResult<T>,
    {
        let command = Command::new(query).bind_all(params);
        self.fetch_envelope(StatementKind::SelectOne, Ok(command), decode)
            .await
            .ok()
            .and_then(|rows| rows.into_iter().next())
            .unwrap_or_default()
    }

    /// Fetch every row, decoded in row order. Empty on failure.
    pub async fn select_list<T, F>(&self, query: &str, decode: F) -> Vec<T>
    where
        F: FnMut(&A::Row) -> DbResult<T>,
    {
        self.select_list_with(query, Vec::new(), decode).await
    }

    pub async fn select_list_with<T, F>(
        &self,
        query: &str,
        params: impl IntoIterator<Item = Parameter>,
        decode: F,
    ) -> Vec<T>
    where
        F: FnMut(&A::Row) -> DbResult<T>,
    {
        let command = Command::new(query).bind_all(params);
        self.fetch_envelope(StatementKind::SelectList, Ok(command), decode)
            .await
            .unwrap_or_default()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Returns the affected-row count, 0 on failure.
    pub async fn insert(&self, query: &str) -> u64 {
        self.insert_with(query, Vec::new()).await
    }

    pub async fn insert_with(
        &self,
        query: &str,
        params: impl IntoIterator<Item = Parameter>,
    ) -> u64 {
        self.write(StatementKind::Insert, query, params).await
    }

    /// Insert an item, binding the fields its [`ToParams`] mapping produces.
    ///
    /// Fields excluded by `filter` are not bound. The placeholders in `query`
    /// must follow the order of the remaining fields.
    pub async fn insert_item<I>(&self, query: &str, item: &I, filter: &FieldFilter) -> u64
    where
        I: ToParams + ?Sized,
    {
        self.insert_with(query, filter.apply(item.to_params())).await
    }

    /// Like [`insert_item`](Self::insert_item) for any `Serialize` struct.
    ///
    /// Fields are bound in name order. An item that does not serialize to an
    /// object is a statement failure.
    pub async fn insert_serialized<I>(&self, query: &str, item: &I, filter: &FieldFilter) -> u64
    where
        I: Serialize + ?Sized,
    {
        let prepared = params_from_serialize(item)
            .map(|params| Command::new(query).bind_all(filter.apply(params)));
        self.execute_envelope(StatementKind::Insert, prepared)
            .await
            .unwrap_or(0)
    }

    pub async fn update(&self, query: &str) -> u64 {
        self.update_with(query, Vec::new()).await
    }

    pub async fn update_with(
        &self,
        query: &str,
        params: impl IntoIterator<Item = Parameter>,
    ) -> u64 {
        self.write(StatementKind::Update, query, params).await
    }

    pub async fn delete(&self, query: &str) -> u64 {
        self.delete_with(query, Vec::new()).await
    }

    pub async fn delete_with(
        &self,
        query: &str,
        params: impl IntoIterator<Item = Parameter>,
    ) -> u64 {
        self.write(StatementKind::Delete, query, params).await
    }

    async fn write(
        &self,
        operation: StatementKind,
        query: &str,
        params: impl IntoIterator<Item = Parameter>,
    ) -> u64 {
        let command = Command::new(query).bind_all(params);
        self.execute_envelope(operation, Ok(command))
            .await
            .unwrap_or(0)
    }

    // =========================================================================
    // Typed results
    // =========================================================================

    /// Fetch at most one row. `Ok(None)` when the query returned nothing.
    ///
    /// Failures are reported like in [`select_one`](Self::select_one) and also returned.
    pub async fn try_select_one<T, F>(&self, command: &Command, decode: F) -> DbResult<Option<T>>
    where
        F: FnMut(&A::Row) -> DbResult<T>,
    {
        let rows = self
            .fetch_envelope(StatementKind::SelectOne, Ok(command.clone()), decode)
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn try_select_list<T, F>(&self, command: &Command, decode: F) -> DbResult<Vec<T>>
    where
        F: FnMut(&A::Row) -> DbResult<T>,
    {
        self.fetch_envelope(StatementKind::SelectList, Ok(command.clone()), decode)
            .await
    }

    /// Run a non-query command and return the affected-row count.
    pub async fn try_execute(&self, command: &Command) -> DbResult<u64> {
        let operation = match command.kind() {
            kind @ (StatementKind::Insert | StatementKind::Update | StatementKind::Delete) => kind,
            _ => StatementKind::Execute,
        };
        self.execute_envelope(operation, Ok(command.clone())).await
    }

    // =========================================================================
    // Envelope
    // =========================================================================

    async fn fetch_envelope<T, F>(
        &self,
        operation: StatementKind,
        prepared: DbResult<Command>,
        decode: F,
    ) -> DbResult<Vec<T>>
    where
        F: FnMut(&A::Row) -> DbResult<T>,
    {
        let start = Instant::now();
        let single_row = operation == StatementKind::SelectOne;
        let mut session = self.lifecycle.session().await;

        let result = async {
            let connection = session.ensure_open().await?;
            let command = prepared?.with_kind(operation);
            debug!(
                operation = %operation,
                sql = %command.sql(),
                params = command.params().len(),
                "Executing query"
            );

            // One extra row is enough to detect a select_one violation.
            let limit = single_row.then_some(2);
            let rows = self
                .lifecycle
                .adapter()
                .fetch_rows(connection, &command, limit)
                .await?;

            if single_row && rows.len() > 1 {
                return Err(DbError::contract_violation(
                    operation.as_str(),
                    "Query returned more than one row",
                ));
            }
            rows.iter().map(decode).collect::<DbResult<Vec<T>>>()
        }
        .await;

        let closed = session.keep_alive_check().await;
        self.finish(operation, start, result, closed)
    }

    async fn execute_envelope(
        &self,
        operation: StatementKind,
        prepared: DbResult<Command>,
    ) -> DbResult<u64> {
        let start = Instant::now();
        let mut session = self.lifecycle.session().await;

        let result = async {
            let connection = session.ensure_open().await?;
            let command = prepared?.with_kind(operation);
            debug!(
                operation = %operation,
                sql = %command.sql(),
                params = command.params().len(),
                "Executing statement"
            );
            self.lifecycle
                .adapter()
                .execute(connection, &command)
                .await
        }
        .await;

        let closed = session.keep_alive_check().await;
        self.finish(operation, start, result, closed)
    }

    /// Log the outcome and report at most one failure. Runs with the slot released.
    ///
    /// The operation's own failure wins over a failed close in the keep-alive
    /// check. A close failure after a successful operation is reported, but the
    /// operation's result stands.
    fn finish<R>(
        &self,
        operation: StatementKind,
        start: Instant,
        result: DbResult<R>,
        closed: DbResult<()>,
    ) -> DbResult<R> {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let failure = match (&result, &closed) {
            (Err(e), Err(close_err)) => {
                debug!(operation = %operation, error = %close_err, "Close after failed operation also failed");
                Some(e)
            }
            (Err(e), Ok(())) => Some(e),
            (Ok(_), Err(close_err)) => Some(close_err),
            (Ok(_), Ok(())) => None,
        };
        match failure {
            None => debug!(operation = %operation, elapsed_ms, "Operation completed"),
            Some(e) => {
                debug!(
                    operation = %operation,
                    elapsed_ms,
                    kind = %e.kind(),
                    retryable = e.is_retryable(),
                    "Operation failed"
                );
                self.lifecycle.report(e);
            }
        }
        result
    }
}

impl<A: EngineAdapter> std::fmt::Debug for DbWrapper<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbWrapper")
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseType;
    use sqlx::Row;
    use std::sync::{Arc, Mutex};

    fn memory_wrapper() -> DbWrapper<SqliteEngine> {
        DbWrapper::sqlite(WrapperConfig::sqlite(":memory:").with_keep_alive(true))
    }

    #[tokio::test]
    async fn test_new_does_not_connect() {
        let wrapper = memory_wrapper();
        assert!(!wrapper.is_open().await);
        assert_eq!(wrapper.state().await, ConnectionState::Closed);
        assert_eq!(
            wrapper.lifecycle().adapter().database_type(),
            DatabaseType::SQLite
        );
    }

    #[tokio::test]
    async fn test_select_one_decodes_single_row() {
        let wrapper = memory_wrapper();
        let value: i64 = wrapper
            .select_one("SELECT 41 + 1 AS answer", |row| {
                Ok(row.try_get::<i64, _>("answer")?)
            })
            .await;
        assert_eq!(value, 42);
        assert!(wrapper.is_open().await);
        wrapper.close().await;
    }

    #[tokio::test]
    async fn test_select_one_rejects_second_row() {
        let wrapper = memory_wrapper();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        wrapper.set_error_reporting(true);
        wrapper.set_error_reporter(move |e| sink.lock().unwrap().push(e.kind()));

        let value: i64 = wrapper
            .select_one("SELECT 1 UNION ALL SELECT 2", |row| Ok(row.try_get(0)?))
            .await;

        assert_eq!(value, 0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![crate::error::FailureKind::ContractViolation]
        );
        wrapper.close().await;
    }

    #[tokio::test]
    async fn test_insert_serialized_rejects_scalar() {
        let wrapper = memory_wrapper();
        let affected = wrapper
            .insert_serialized("INSERT INTO t VALUES (?)", &5, &FieldFilter::All)
            .await;
        assert_eq!(affected, 0);
        // The connection was still opened and kept.
        assert!(wrapper.is_open().await);
        wrapper.close().await;
    }

    #[tokio::test]
    async fn test_try_execute_returns_error() {
        let wrapper = memory_wrapper();
        let err = wrapper
            .try_execute(&Command::new("DROP TABLE nothing_here"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Database { .. }));
        wrapper.close().await;
    }
}

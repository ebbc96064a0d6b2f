//! Scripted in-memory engine for lifecycle tests.
//!
//! Every connection is counted on open, close and drop so tests can assert
//! exactly how many physical connections existed at any point.

#![allow(dead_code)]

use db_wrapper::db::EngineAdapter;
use db_wrapper::error::{DbError, DbResult, FailureKind};
use db_wrapper::models::{Command, DatabaseType, QueryParam, WrapperConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

#[derive(Debug, Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub open_attempts: AtomicUsize,
    pub closes: AtomicUsize,
    /// Connections not yet dropped.
    pub live: AtomicUsize,
    pub statements: AtomicUsize,
    pub last_params: Mutex<Vec<(String, QueryParam)>>,
}

impl Counters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }

    pub fn last_param_names(&self) -> Vec<String> {
        self.last_params
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Statements containing `FAIL` are rejected. A query's row count is its last
/// word when that is a number (`SELECT 3` yields three rows), otherwise one row.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    pub counters: Arc<Counters>,
    pub fail_open: Arc<AtomicBool>,
    pub fail_close: Arc<AtomicBool>,
    pub open_delay: Duration,
    pub statement_delay: Duration,
    pub affected: u64,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            fail_open: Arc::new(AtomicBool::new(false)),
            fail_close: Arc::new(AtomicBool::new(false)),
            open_delay: Duration::ZERO,
            statement_delay: Duration::ZERO,
            affected: 1,
        }
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn with_statement_delay(mut self, delay: Duration) -> Self {
        self.statement_delay = delay;
        self
    }

    pub fn with_affected(mut self, affected: u64) -> Self {
        self.affected = affected;
        self
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Closing still drops the connection, then reports an error.
    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    async fn run_statement(&self, command: &Command) -> DbResult<()> {
        if !self.statement_delay.is_zero() {
            tokio::time::sleep(self.statement_delay).await;
        }
        self.counters.statements.fetch_add(1, Ordering::SeqCst);
        *self.counters.last_params.lock().unwrap() = command
            .params()
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect();
        if command.sql().contains("FAIL") {
            return Err(DbError::database(
                format!("scripted failure: {}", command.sql()),
                Some("42000".to_string()),
                "Remove FAIL from the statement",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ScriptedConnection {
    pub id: usize,
    counters: Arc<Counters>,
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedRow {
    pub index: usize,
    pub connection_id: usize,
}

impl EngineAdapter for ScriptedEngine {
    type Connection = ScriptedConnection;
    type Row = ScriptedRow;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn build_connection_string(&self, config: &WrapperConfig) -> String {
        format!(
            "scripted://{}:{}@{}/{}",
            config.username, config.password, config.server_url, config.db_name
        )
    }

    async fn open_connection(&self, _connection_string: &str) -> DbResult<ScriptedConnection> {
        self.counters.open_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(DbError::connection("scripted open failure", "Unset fail_open"));
        }
        let id = self.counters.opens.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedConnection {
            id,
            counters: Arc::clone(&self.counters),
        })
    }

    async fn close_connection(&self, connection: ScriptedConnection) -> DbResult<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        drop(connection);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(DbError::connection("scripted close failure", "Unset fail_close"));
        }
        Ok(())
    }

    async fn fetch_rows(
        &self,
        connection: &mut ScriptedConnection,
        command: &Command,
        limit: Option<usize>,
    ) -> DbResult<Vec<ScriptedRow>> {
        self.run_statement(command).await?;
        let count = command
            .sql()
            .split_whitespace()
            .last()
            .and_then(|word| word.parse::<usize>().ok())
            .unwrap_or(1);
        let count = limit.map_or(count, |l| count.min(l));
        Ok((0..count)
            .map(|index| ScriptedRow {
                index,
                connection_id: connection.id,
            })
            .collect())
    }

    async fn execute(&self, _connection: &mut ScriptedConnection, command: &Command) -> DbResult<u64> {
        self.run_statement(command).await?;
        Ok(self.affected)
    }
}

pub fn server_config() -> WrapperConfig {
    WrapperConfig::new("scripted.local", "tester", "hunter2", "main", 1)
}

pub fn keep_alive_config(idle_ms: u64) -> WrapperConfig {
    server_config()
        .with_keep_alive(true)
        .with_idle_timeout_ms(idle_ms)
}

/// Collects reported failures.
#[derive(Debug, Clone, Default)]
pub struct ReportLog {
    entries: Arc<Mutex<Vec<(FailureKind, String)>>>,
}

impl ReportLog {
    pub fn sink(&self) -> impl Fn(&DbError) + Send + Sync + 'static {
        let entries = Arc::clone(&self.entries);
        move |e: &DbError| entries.lock().unwrap().push((e.kind(), e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn kinds(&self) -> Vec<FailureKind> {
        self.entries.lock().unwrap().iter().map(|(k, _)| *k).collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }
}

/// Messages of tracing events recorded while the guard from [`capture_logs`] lives.
#[derive(Debug, Clone, Default)]
pub struct LogLines {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogLines {
    pub fn count(&self, message: &str) -> usize {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.as_str() == message)
            .count()
    }
}

struct CaptureLayer(LogLines);

struct MessageVisitor(Option<String>);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = Some(format!("{:?}", value));
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(None);
        event.record(&mut visitor);
        if let Some(message) = visitor.0 {
            self.0.lines.lock().unwrap().push(message);
        }
    }
}

/// Record events emitted on this thread. Use with a current-thread runtime.
pub fn capture_logs() -> (tracing::subscriber::DefaultGuard, LogLines) {
    let lines = LogLines::default();
    let subscriber = tracing_subscriber::registry().with(CaptureLayer(lines.clone()));
    (tracing::subscriber::set_default(subscriber), lines)
}

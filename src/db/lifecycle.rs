//! Connection lifecycle management.
//!
//! A wrapper owns exactly one physical connection and at most one idle timer.
//! This module decides when that connection is opened, kept, and torn down.
//!
//! # State machine
//!
//! ```text
//!            ensure_open                 idle timeout / keep-alive check (keep-alive off)
//!  Closed ───────────────▶ Open ─────────────────────────────────────────────▶ Closed
//!                           │ ▲
//!                           └─┘ ensure_open (no-op)
//! ```
//!
//! Construction never connects; the first operation does.
//!
//! # Concurrency Safety
//!
//! - The connection handle and the timer live behind a single `tokio::sync::Mutex`.
//!   An operation holds it for its whole envelope (open, execute, keep-alive check),
//!   so the idle timer can never close a connection that is in use.
//! - Resetting the timer is cancel-and-reschedule: the old task is aborted and the
//!   generation number is bumped. A timer task that already woke up re-checks its
//!   generation under the lock and does nothing if it was superseded.
//! - The timer task holds a `Weak` reference, so it never keeps a dropped wrapper alive.
//! - If an operation future is dropped before its keep-alive check ran (caller-side
//!   timeout, panic in a decode callback), [`Session`]'s `Drop` applies the policy
//!   synchronously.

use crate::db::engine::EngineAdapter;
use crate::error::{DbError, DbResult};
use crate::models::WrapperConfig;
use crate::reporter::ErrorReporter;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Observable state of the connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
}

struct IdleTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl IdleTimer {
    fn cancel(self) {
        self.handle.abort();
    }
}

struct Slot<C> {
    connection: Option<C>,
    timer: Option<IdleTimer>,
    /// Incremented every time a timer is armed.
    generation: u64,
}

struct Shared<A: EngineAdapter> {
    adapter: A,
    config: WrapperConfig,
    /// Derived once at construction. Contains credentials - never log.
    connection_string: String,
    reporter: ErrorReporter,
    slot: Mutex<Slot<A::Connection>>,
}

impl<A: EngineAdapter> Shared<A> {
    fn masked_connection_string(&self) -> String {
        self.adapter.mask_connection_string(&self.connection_string)
    }

    /// Close and report a failure. Used outside the operation envelope.
    async fn close_connection(&self, connection: A::Connection) {
        if let Err(e) = self.adapter.close_connection(connection).await {
            self.reporter.report(&e);
        }
    }

    /// Fired by the idle timer task.
    async fn on_idle_timeout(&self, generation: u64) {
        let mut slot = self.slot.lock().await;
        match &slot.timer {
            Some(timer) if timer.generation == generation => {}
            _ => {
                debug!(generation, "Ignoring superseded idle timer");
                return;
            }
        }
        // Dropping our own handle detaches it; the task is already finishing.
        slot.timer = None;

        if let Some(connection) = slot.connection.take() {
            debug!(
                db_type = %self.adapter.database_type(),
                idle_ms = self.config.idle_timeout.as_millis() as u64,
                "Idle timeout elapsed, closing connection"
            );
            self.close_connection(connection).await;
        }
    }
}

impl<A: EngineAdapter> Drop for Shared<A> {
    fn drop(&mut self) {
        if let Some(timer) = self.slot.get_mut().timer.take() {
            timer.cancel();
        }
    }
}

/// (Re)arm the idle timer. Any previous timer is cancelled.
fn arm_idle_timer<A: EngineAdapter>(shared: &Arc<Shared<A>>, slot: &mut Slot<A::Connection>) {
    if let Some(timer) = slot.timer.take() {
        timer.cancel();
    }

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("No async runtime available, idle timer not armed");
        return;
    };

    slot.generation = slot.generation.wrapping_add(1);
    let generation = slot.generation;
    let idle_timeout = shared.config.idle_timeout;
    let weak: Weak<Shared<A>> = Arc::downgrade(shared);

    let handle = runtime.spawn(async move {
        tokio::time::sleep(idle_timeout).await;
        if let Some(shared) = weak.upgrade() {
            shared.on_idle_timeout(generation).await;
        }
    });

    slot.timer = Some(IdleTimer { generation, handle });
}

/// Owner of the single connection handle and its idle timer.
pub struct ConnectionLifecycle<A: EngineAdapter> {
    shared: Arc<Shared<A>>,
}

impl<A: EngineAdapter> ConnectionLifecycle<A> {
    /// Create the lifecycle manager in the `Closed` state.
    ///
    /// The connection string is derived from `config` here and never again.
    pub fn new(adapter: A, config: WrapperConfig) -> Self {
        let connection_string = adapter.build_connection_string(&config);
        let reporter = ErrorReporter::new(config.enable_error_log);
        let shared = Arc::new(Shared {
            adapter,
            config,
            connection_string,
            reporter,
            slot: Mutex::new(Slot {
                connection: None,
                timer: None,
                generation: 0,
            }),
        });

        debug!(
            db_type = %shared.adapter.database_type(),
            connection = %shared.masked_connection_string(),
            keep_alive = shared.config.keep_alive,
            "Connection lifecycle created"
        );

        Self { shared }
    }

    pub fn adapter(&self) -> &A {
        &self.shared.adapter
    }

    pub fn config(&self) -> &WrapperConfig {
        &self.shared.config
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.shared.reporter
    }

    /// Connection string with the password masked.
    pub fn masked_connection_string(&self) -> String {
        self.shared.masked_connection_string()
    }

    /// Report a failure through the configured reporter.
    pub fn report(&self, err: &DbError) {
        self.shared.reporter.report(err);
    }

    /// Lock the connection slot for one operation.
    pub(crate) async fn session(&self) -> Session<'_, A> {
        Session {
            shared: &self.shared,
            slot: self.shared.slot.lock().await,
            settled: false,
        }
    }

    pub async fn state(&self) -> ConnectionState {
        if self.shared.slot.lock().await.connection.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    pub async fn is_open(&self) -> bool {
        self.state().await == ConnectionState::Open
    }

    /// Whether an idle timer is currently armed.
    pub async fn has_idle_timer(&self) -> bool {
        self.shared.slot.lock().await.timer.is_some()
    }

    /// Open the connection now instead of on first use.
    ///
    /// In keep-alive mode this arms the idle timer. Failures are reported, not returned.
    pub async fn open(&self) {
        let mut session = self.session().await;
        let already_open = session.has_connection();
        match session.ensure_open().await {
            Ok(_) if already_open => debug!("Connection already open"),
            Ok(_) => info!(
                db_type = %self.shared.adapter.database_type(),
                "Connection opened"
            ),
            Err(e) => self.report(&e),
        }
        session.detach();
    }

    /// Close the connection and dispose of the idle timer. Safe to call repeatedly.
    pub async fn close(&self) {
        let mut slot = self.shared.slot.lock().await;
        if let Some(timer) = slot.timer.take() {
            timer.cancel();
        }
        if let Some(connection) = slot.connection.take() {
            self.shared.close_connection(connection).await;
            info!(
                db_type = %self.shared.adapter.database_type(),
                "Connection closed"
            );
        }
    }
}

impl<A: EngineAdapter> std::fmt::Debug for ConnectionLifecycle<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLifecycle")
            .field("db_type", &self.shared.adapter.database_type())
            .field("connection", &self.shared.masked_connection_string())
            .field("keep_alive", &self.shared.config.keep_alive)
            .finish_non_exhaustive()
    }
}

/// Exclusive access to the connection slot for the duration of one operation.
///
/// Finish with [`Session::keep_alive_check`]; if the session is dropped first,
/// the keep-alive policy is applied on drop.
pub(crate) struct Session<'a, A: EngineAdapter> {
    shared: &'a Arc<Shared<A>>,
    slot: MutexGuard<'a, Slot<A::Connection>>,
    settled: bool,
}

impl<A: EngineAdapter> Session<'_, A> {
    /// Open the connection if it is closed. No-op when already open.
    pub(crate) async fn ensure_open(&mut self) -> DbResult<&mut A::Connection> {
        if self.slot.connection.is_none() {
            let shared = self.shared;
            debug!(
                db_type = %shared.adapter.database_type(),
                connection = %shared.masked_connection_string(),
                "Opening connection"
            );

            let connect_timeout = shared.config.connect_timeout;
            let opened = tokio::time::timeout(
                connect_timeout,
                shared.adapter.open_connection(&shared.connection_string),
            )
            .await;
            let connection = match opened {
                Ok(result) => result?,
                Err(_) => {
                    return Err(DbError::timeout("connection open", connect_timeout));
                }
            };

            self.slot.connection = Some(connection);
            if shared.config.keep_alive {
                arm_idle_timer(shared, &mut self.slot);
            }
        }

        self.slot
            .connection
            .as_mut()
            .ok_or_else(|| DbError::internal("Connection missing after open"))
    }

    /// Apply the keep-alive policy after an operation, whether it failed or not.
    ///
    /// Keep-alive on: reset the idle timer. Off: stop the timer and close the
    /// connection. A failed close is handed back, not reported; the operation
    /// reports at most one failure.
    pub(crate) async fn keep_alive_check(mut self) -> DbResult<()> {
        self.settled = true;
        if self.shared.config.keep_alive {
            arm_idle_timer(self.shared, &mut self.slot);
            return Ok(());
        }

        if let Some(timer) = self.slot.timer.take() {
            timer.cancel();
        }
        match self.slot.connection.take() {
            Some(connection) => {
                debug!(
                    db_type = %self.shared.adapter.database_type(),
                    "Keep-alive disabled, closing connection"
                );
                self.shared.adapter.close_connection(connection).await
            }
            None => Ok(()),
        }
    }

    /// Whether a connection is already in the slot.
    pub(crate) fn has_connection(&self) -> bool {
        self.slot.connection.is_some()
    }

    /// Release the lock without applying the keep-alive policy.
    pub(crate) fn detach(mut self) {
        self.settled = true;
    }
}

impl<A: EngineAdapter> Drop for Session<'_, A> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(
            db_type = %self.shared.adapter.database_type(),
            keep_alive = self.shared.config.keep_alive,
            "Operation ended before its keep-alive check, applying policy on drop"
        );
        if self.shared.config.keep_alive {
            arm_idle_timer(self.shared, &mut self.slot);
        } else {
            if let Some(timer) = self.slot.timer.take() {
                timer.cancel();
            }
            // No graceful shutdown possible here; dropping the handle closes the socket.
            self.slot.connection = None;
        }
    }
}

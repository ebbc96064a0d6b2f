//! Pluggable error sink.
//!
//! Every failure caught at the wrapper boundary is handed to an [`ErrorReporter`].
//! The reporter forwards it to its sink only while reporting is enabled; otherwise
//! the failure is dropped. Both the sink and the enabled flag can be swapped at
//! any time without coordination with in-flight operations.

use crate::error::DbError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::error;

/// Signature of a reporter sink.
pub type ReportFn = dyn Fn(&DbError) + Send + Sync;

pub struct ErrorReporter {
    enabled: AtomicBool,
    sink: RwLock<Arc<ReportFn>>,
}

impl ErrorReporter {
    /// Create a reporter with the default tracing sink.
    pub fn new(enabled: bool) -> Self {
        let sink: Arc<ReportFn> = Arc::new(default_sink);
        Self {
            enabled: AtomicBool::new(enabled),
            sink: RwLock::new(sink),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Replace the sink.
    pub fn set_sink<F>(&self, sink: F)
    where
        F: Fn(&DbError) + Send + Sync + 'static,
    {
        if let Ok(mut guard) = self.sink.write() {
            *guard = Arc::new(sink);
        }
    }

    /// Hand a failure to the sink if reporting is enabled.
    pub fn report(&self, err: &DbError) {
        if !self.is_enabled() {
            return;
        }
        // Clone the Arc so the sink runs without the lock held; a sink may
        // replace itself.
        let sink = match self.sink.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        };
        sink(err);
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(false)
    }
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

fn default_sink(err: &DbError) {
    error!(
        kind = %err.kind(),
        error = %err,
        suggestion = ?err.suggestion(),
        "Database operation failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_sink(counter: &Arc<AtomicUsize>) -> impl Fn(&DbError) + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_disabled_reporter_drops_failures() {
        let counter = Arc::new(AtomicUsize::new(0));
        let reporter = ErrorReporter::new(false);
        reporter.set_sink(counting_sink(&counter));
        reporter.report(&DbError::internal("boom"));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_enabled_reporter_invokes_sink_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let reporter = ErrorReporter::new(true);
        reporter.set_sink(counting_sink(&counter));
        reporter.report(&DbError::internal("boom"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_toggle_at_runtime() {
        let counter = Arc::new(AtomicUsize::new(0));
        let reporter = ErrorReporter::default();
        reporter.set_sink(counting_sink(&counter));
        reporter.report(&DbError::internal("a"));
        reporter.set_enabled(true);
        reporter.report(&DbError::internal("b"));
        reporter.set_enabled(false);
        reporter.report(&DbError::internal("c"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replacing_sink() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let reporter = ErrorReporter::new(true);
        reporter.set_sink(counting_sink(&first));
        reporter.report(&DbError::internal("a"));
        reporter.set_sink(counting_sink(&second));
        reporter.report(&DbError::internal("b"));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_sink_does_not_panic() {
        let reporter = ErrorReporter::new(true);
        reporter.report(&DbError::connection("refused", "start the server"));
    }
}

//! Engine dispatch macros.
//!
//! [`AnyDbWrapper`](crate::db::any::AnyDbWrapper) holds a differently typed
//! `DbWrapper` per engine. These macros expand to a `match` over its variants so
//! the same body can be written once and type-checked against each engine.

/// Generate match arms over `AnyDbWrapper` variants.
///
/// The short form runs one body for every engine; the body is expanded per arm,
/// so it may use engine-specific row types:
///
/// ```ignore
/// impl_engine_dispatch!(self, w => w.is_open().await)
/// ```
///
/// The long form gives each engine its own body:
///
/// ```ignore
/// impl_engine_dispatch!(self, {
///     MySql(w) => do_mysql(w),
///     Postgres(w) => do_postgres(w),
///     SQLite(w) => do_sqlite(w),
/// })
/// ```
#[macro_export]
macro_rules! impl_engine_dispatch {
    ($wrapper:expr, $w:ident => $body:expr) => {
        match $wrapper {
            $crate::db::any::AnyDbWrapper::MySql($w) => $body,
            $crate::db::any::AnyDbWrapper::Postgres($w) => $body,
            $crate::db::any::AnyDbWrapper::SQLite($w) => $body,
        }
    };
    ($wrapper:expr, { $($variant:ident($w:ident) => $body:expr),+ $(,)? }) => {
        match $wrapper {
            $(
                $crate::db::any::AnyDbWrapper::$variant($w) => $body,
            )+
        }
    };
}

pub use impl_engine_dispatch;

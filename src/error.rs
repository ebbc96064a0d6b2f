//! Error types for the database wrapper.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Every variant folds into one of three failure categories (see [`FailureKind`]):
//! the connection could not be opened or closed, a statement failed, or a caller
//! contract was violated.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Timeout: {operation} exceeded {limit:?}")]
    Timeout { operation: String, limit: Duration },

    #[error("Contract violation in {operation}: {message}")]
    ContractViolation { operation: String, message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse failure category reported alongside every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The physical connection could not be opened or closed.
    ConnectionFailure,
    /// The statement was rejected, failed while running, or its rows failed to decode.
    StatementFailure,
    /// The caller's expectations about the result were violated (e.g. more than one row).
    ContractViolation,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailure => write!(f, "connection_failure"),
            Self::StatementFailure => write!(f, "statement_failure"),
            Self::ContractViolation => write!(f, "contract_violation"),
        }
    }
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit,
        }
    }

    /// Create a contract violation error.
    pub fn contract_violation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContractViolation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Failure category of this error.
    ///
    /// Timeouts only arise while establishing the connection, so they count as
    /// connection failures.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => FailureKind::ConnectionFailure,
            Self::ContractViolation { .. } => FailureKind::ContractViolation,
            Self::Database { .. }
            | Self::Schema { .. }
            | Self::InvalidInput { .. }
            | Self::Internal { .. } => FailureKind::StatementFailure,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// SQLSTATE reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Map driver errors onto the wrapper's categories.
///
/// Transport-level problems (I/O, TLS, protocol, configuration) become
/// [`DbError::Connection`]; anything the server or the row decoder rejected is a
/// statement failure.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;

        match err {
            E::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                let suggestion = statement_suggestion(db_err.kind(), code.as_deref());
                DbError::database(db_err.message(), code, suggestion)
            }
            E::Configuration(msg) => DbError::connection(
                format!("Invalid connection settings: {}", msg),
                "Check the server address, port, credentials and database name",
            ),
            E::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and that the server is up",
            ),
            E::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Build with the tls-native or tls-rustls feature, or disable TLS on the server",
            ),
            E::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check that the URL scheme matches the server's engine",
            ),
            E::AnyDriverError(inner) => DbError::connection(
                format!("Driver error: {}", inner),
                "Check the driver configuration",
            ),
            E::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Use select_one or select_list, which accept empty results",
            ),
            E::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col)
            }
            E::TypeNotFound { type_name } => {
                DbError::schema(format!("Type not found: {}", type_name), type_name)
            }
            E::ColumnIndexOutOfBounds { index, len } => DbError::invalid_input(format!(
                "Column index {} out of bounds, row has {} columns",
                index, len
            )),
            E::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            E::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            other => DbError::internal(format!("Unexpected driver error: {}", other)),
        }
    }
}

/// Hint for a statement the server rejected.
///
/// Constraint violations are recognised by the driver; everything else is keyed
/// on the two-character SQLSTATE class.
fn statement_suggestion(kind: sqlx::error::ErrorKind, sql_state: Option<&str>) -> &'static str {
    use sqlx::error::ErrorKind;

    match kind {
        ErrorKind::UniqueViolation => return "A row with the same key already exists",
        ErrorKind::ForeignKeyViolation => {
            return "The referenced row is missing, or the row is still referenced";
        }
        ErrorKind::NotNullViolation => return "Bind a value for every NOT NULL column",
        ErrorKind::CheckViolation => return "The value fails a CHECK constraint",
        _ => {}
    }

    match sql_state.map(|s| s.get(..2).unwrap_or(s)) {
        Some("08") => "The server dropped the connection; check server status",
        Some("22") => "Check parameter values against the column types and lengths",
        Some("40") => "The server rolled the statement back; retry the operation",
        Some("42") => "Check the SQL syntax, object names and privileges",
        _ => "Check the SQL syntax and referenced objects",
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

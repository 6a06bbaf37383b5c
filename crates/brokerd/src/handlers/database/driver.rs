//! Seam between the database handlers and a concrete client library.

use serde_json::Value;
use thiserror::Error;

use crate::cache::ConnectionSpec;

/// Failure reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The connection itself is unusable; cached copies are invalidated.
    #[error("connection error: {message}")]
    Connection { message: String },
    /// The statement failed but the connection survives.
    #[error("query error: {message}")]
    Query { message: String },
}

impl DriverError {
    /// Creates a connection-level error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a statement-level error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Whether the connection should be discarded.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Fully buffered result of one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Column names, empty for statements that return no rows.
    pub columns: Vec<String>,
    /// Rows in column order.
    pub rows: Vec<Vec<Value>>,
    /// Rows changed, when the driver reports it.
    pub rows_affected: Option<u64>,
}

/// Opens connections.
pub trait DatabaseDriver: Send + Sync {
    /// Connects using `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the server cannot be reached or refuses
    /// the credentials.
    fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn DatabaseConnection>, DriverError>;
}

/// One live session with a database server.
pub trait DatabaseConnection: Send {
    /// Checks that `sql` can be prepared.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the server rejects the statement.
    fn prepare(&mut self, sql: &str) -> Result<(), DriverError>;

    /// Executes `sql` with positional `binds`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when execution fails.
    fn execute(&mut self, sql: &str, binds: &[Value]) -> Result<QueryResult, DriverError>;

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the server refuses.
    fn begin(&mut self) -> Result<(), DriverError>;

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the commit fails.
    fn commit(&mut self) -> Result<(), DriverError>;

    /// Rolls back the open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the rollback fails.
    fn rollback(&mut self) -> Result<(), DriverError>;
}

//! In-memory driver for exercising the database handlers.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};

use crate::cache::ConnectionSpec;

use super::{DatabaseConnection, DatabaseDriver, DriverError, QueryResult};

/// Driver whose behaviour is selected by the DSN and SQL text.
///
/// DSNs containing `unreachable` fail to connect. `SELECT` returns two rows;
/// `FAIL CONNECTION` raises a connection error and any other statement
/// containing `FAIL` a query error.
#[derive(Debug, Default)]
pub(crate) struct FakeDriver {
    connects: AtomicUsize,
}

impl FakeDriver {
    /// Successful connects so far.
    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl DatabaseDriver for FakeDriver {
    fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn DatabaseConnection>, DriverError> {
        if spec.dsn.contains("unreachable") {
            return Err(DriverError::connection("host unreachable"));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection::default()))
    }
}

#[derive(Debug, Default)]
struct FakeConnection {
    in_transaction: bool,
}

impl DatabaseConnection for FakeConnection {
    fn prepare(&mut self, sql: &str) -> Result<(), DriverError> {
        if sql.trim().is_empty() {
            return Err(DriverError::query("empty statement"));
        }
        Ok(())
    }

    fn execute(&mut self, sql: &str, binds: &[Value]) -> Result<QueryResult, DriverError> {
        let upper = sql.to_ascii_uppercase();
        if upper.contains("FAIL CONNECTION") {
            return Err(DriverError::connection("server closed the connection"));
        }
        if upper.contains("FAIL") {
            return Err(DriverError::query("syntax error"));
        }
        if upper.trim_start().starts_with("SELECT") {
            return Ok(QueryResult {
                columns: vec![String::from("id"), String::from("name")],
                rows: vec![vec![json!(1), json!("alpha")], vec![json!(2), json!("beta")]],
                rows_affected: None,
            });
        }
        Ok(QueryResult {
            rows_affected: Some(u64::try_from(binds.len().max(1)).unwrap_or(u64::MAX)),
            ..QueryResult::default()
        })
    }

    fn begin(&mut self) -> Result<(), DriverError> {
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        if !self.in_transaction {
            return Err(DriverError::query("no transaction in progress"));
        }
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.in_transaction = false;
        Ok(())
    }
}

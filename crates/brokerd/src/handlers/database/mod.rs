//! DBI-style database functions over a pluggable [`DatabaseDriver`].
//!
//! Connections and statements live in the handle registry. A statement
//! records the connection it was prepared on, and the connection records its
//! statements so that `disconnect` can close them too. Results are buffered
//! in the statement at execution time and drained by `fetch_row` and
//! `fetch_all`.
//!
//! Driver calls run inside the connection's handle lock. A connection-level
//! [`DriverError`] invalidates the cached connection once that lock has been
//! released, so the next `connect_cached` reconnects.

mod driver;
#[cfg(test)]
pub(crate) mod test_support;

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::cache::ConnectionSpec;
use crate::dispatch::{Handler, HandlerError, HandlerTable, parse_params};
use crate::registry::{HandleId, HandleKind, RegistryError};
use crate::services::BrokerServices;

use super::HANDLERS_TARGET;

pub use self::driver::{DatabaseConnection, DatabaseDriver, DriverError, QueryResult};

const MODULE: &str = "database";

type Operation = fn(&Database, &BrokerServices, &Value) -> Result<Value, HandlerError>;

/// Registers the `database` module backed by `driver`.
pub fn register(table: &mut HandlerTable, driver: Arc<dyn DatabaseDriver>) {
    let database = Arc::new(Database { driver });
    let operations: [(&str, Operation); 12] = [
        ("connect", Database::connect),
        ("connect_cached", Database::connect_cached),
        ("prepare", Database::prepare),
        ("execute_statement", Database::execute_statement),
        ("fetch_row", Database::fetch_row),
        ("fetch_all", Database::fetch_all),
        ("execute_immediate", Database::execute_immediate),
        ("begin_transaction", Database::begin_transaction),
        ("commit", Database::commit),
        ("rollback", Database::rollback),
        ("finish_statement", Database::finish_statement),
        ("disconnect", Database::disconnect),
    ];
    for (function, operation) in operations {
        table.register(MODULE, function, bind(&database, operation));
    }
}

fn bind(database: &Arc<Database>, operation: Operation) -> impl Handler + 'static {
    let database = Arc::clone(database);
    move |services: &BrokerServices, params: &Value| operation(&database, services, params)
}

struct ConnectionState {
    connection: Box<dyn DatabaseConnection>,
    driver: String,
    statements: Vec<HandleId>,
    in_transaction: bool,
}

struct StatementState {
    connection_id: HandleId,
    sql: String,
    executed: bool,
    columns: Vec<String>,
    pending: VecDeque<Vec<Value>>,
}

impl StatementState {
    fn load(&mut self, result: QueryResult) -> Value {
        self.executed = true;
        self.columns = result.columns;
        self.pending = result.rows.into();
        json!({
            "rows_affected": result.rows_affected,
            "column_info": {
                "count": self.columns.len(),
                "names": self.columns,
            },
        })
    }

    fn ensure_executed(&self) -> Result<(), HandlerError> {
        if self.executed {
            Ok(())
        } else {
            Err(HandlerError::failed("statement not executed"))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RowFormat {
    #[default]
    Array,
    Hash,
}

impl RowFormat {
    fn render(self, columns: &[String], row: Vec<Value>) -> Value {
        match self {
            Self::Array => Value::Array(row),
            Self::Hash => Value::Object(
                columns
                    .iter()
                    .cloned()
                    .zip(row)
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConnectionParams {
    connection_id: HandleId,
}

#[derive(Debug, Deserialize)]
struct SqlParams {
    connection_id: HandleId,
    sql: String,
    #[serde(default)]
    bind_values: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ExecuteParams {
    statement_id: HandleId,
    #[serde(default)]
    bind_values: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct FetchParams {
    statement_id: HandleId,
    #[serde(default)]
    format: RowFormat,
}

#[derive(Debug, Deserialize)]
struct StatementParams {
    statement_id: HandleId,
}

struct Database {
    driver: Arc<dyn DatabaseDriver>,
}

impl Database {
    fn open(&self, services: &BrokerServices, spec: &ConnectionSpec) -> Result<HandleId, DriverError> {
        let id = services
            .registry()
            .create_with(HandleKind::Connection, || {
                self.driver.connect(spec).map(|connection| ConnectionState {
                    connection,
                    driver: spec.driver(),
                    statements: Vec::new(),
                    in_transaction: false,
                })
            })?;
        debug!(
            target: HANDLERS_TARGET,
            connection = %id,
            driver = %spec.driver(),
            "database connection opened"
        );
        Ok(id)
    }

    fn connect(&self, services: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
        let spec: ConnectionSpec = parse_params(params)?;
        let id = self
            .open(services, &spec)
            .map_err(|error| HandlerError::failed(error.to_string()))?;
        Ok(json!({"connection_id": id, "cached": false, "driver": spec.driver()}))
    }

    fn connect_cached(
        &self,
        services: &BrokerServices,
        params: &Value,
    ) -> Result<Value, HandlerError> {
        let spec: ConnectionSpec = parse_params(params)?;
        let fingerprint = spec.fingerprint(services.cache_settings().include_secrets);
        let lookup = services
            .cache()
            .get_or_create(&fingerprint, || self.open(services, &spec))
            .map_err(|error| HandlerError::failed(error.to_string()))?;
        Ok(json!({
            "connection_id": lookup.handle_id,
            "cached": lookup.cached,
            "driver": spec.driver(),
        }))
    }

    fn prepare(&self, services: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
        let SqlParams {
            connection_id, sql, ..
        } = parse_params(params)?;
        with_connection(services, &connection_id, |state| {
            state.connection.prepare(&sql)
        })?;
        let statement_id = services.registry().create(
            HandleKind::Statement,
            StatementState {
                connection_id: connection_id.clone(),
                sql,
                executed: false,
                columns: Vec::new(),
                pending: VecDeque::new(),
            },
        );
        let tracked = services.registry().with_handle(
            &connection_id,
            HandleKind::Connection,
            |state: &mut ConnectionState| state.statements.push(statement_id.clone()),
        );
        if let Err(error) = tracked {
            services.registry().destroy(&statement_id);
            return Err(error.into());
        }
        Ok(json!({"statement_id": statement_id}))
    }

    fn execute_statement(
        &self,
        services: &BrokerServices,
        params: &Value,
    ) -> Result<Value, HandlerError> {
        let ExecuteParams {
            statement_id,
            bind_values,
        } = parse_params(params)?;
        let (connection_id, sql) = services.registry().with_handle(
            &statement_id,
            HandleKind::Statement,
            |statement: &mut StatementState| {
                (statement.connection_id.clone(), statement.sql.clone())
            },
        )?;
        let result = with_connection(services, &connection_id, |state| {
            state.connection.execute(&sql, &bind_values)
        })?;
        Ok(services.registry().with_handle(
            &statement_id,
            HandleKind::Statement,
            |statement: &mut StatementState| statement.load(result),
        )?)
    }

    fn fetch_row(&self, services: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
        let FetchParams {
            statement_id,
            format,
        } = parse_params(params)?;
        services.registry().with_handle(
            &statement_id,
            HandleKind::Statement,
            |statement: &mut StatementState| {
                statement.ensure_executed()?;
                let row = statement
                    .pending
                    .pop_front()
                    .map(|row| format.render(&statement.columns, row));
                Ok(json!({
                    "finished": row.is_none(),
                    "row": row,
                }))
            },
        )?
    }

    fn fetch_all(&self, services: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
        let FetchParams {
            statement_id,
            format,
        } = parse_params(params)?;
        services.registry().with_handle(
            &statement_id,
            HandleKind::Statement,
            |statement: &mut StatementState| {
                statement.ensure_executed()?;
                let rows: Vec<Value> = statement
                    .pending
                    .drain(..)
                    .map(|row| format.render(&statement.columns, row))
                    .collect();
                Ok(json!({"count": rows.len(), "rows": rows}))
            },
        )?
    }

    fn execute_immediate(
        &self,
        services: &BrokerServices,
        params: &Value,
    ) -> Result<Value, HandlerError> {
        let SqlParams {
            connection_id,
            sql,
            bind_values,
        } = parse_params(params)?;
        let result = with_connection(services, &connection_id, |state| {
            state.connection.execute(&sql, &bind_values)
        })?;
        Ok(json!({
            "rows_affected": result.rows_affected,
            "columns": result.columns,
            "rows": result.rows,
        }))
    }

    fn begin_transaction(
        &self,
        services: &BrokerServices,
        params: &Value,
    ) -> Result<Value, HandlerError> {
        let ConnectionParams { connection_id } = parse_params(params)?;
        with_connection(services, &connection_id, |state| {
            if state.in_transaction {
                return Err(DriverError::query("transaction already in progress"));
            }
            state.connection.begin()?;
            state.in_transaction = true;
            Ok(())
        })?;
        Ok(json!({"in_transaction": true}))
    }

    fn commit(&self, services: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
        let ConnectionParams { connection_id } = parse_params(params)?;
        with_connection(services, &connection_id, |state| {
            state.connection.commit()?;
            state.in_transaction = false;
            Ok(())
        })?;
        Ok(json!({"in_transaction": false}))
    }

    fn rollback(&self, services: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
        let ConnectionParams { connection_id } = parse_params(params)?;
        with_connection(services, &connection_id, |state| {
            state.connection.rollback()?;
            state.in_transaction = false;
            Ok(())
        })?;
        Ok(json!({"in_transaction": false}))
    }

    fn finish_statement(
        &self,
        services: &BrokerServices,
        params: &Value,
    ) -> Result<Value, HandlerError> {
        let StatementParams { statement_id } = parse_params(params)?;
        let statement = match services
            .registry()
            .take::<StatementState>(&statement_id, HandleKind::Statement)
        {
            Ok(statement) => statement,
            Err(RegistryError::NotFound { .. }) => return Ok(json!({"finished": false})),
            Err(error) => return Err(error.into()),
        };
        let detached = services.registry().with_handle(
            &statement.connection_id,
            HandleKind::Connection,
            |state: &mut ConnectionState| state.statements.retain(|id| id != &statement_id),
        );
        match detached {
            Ok(()) | Err(RegistryError::NotFound { .. }) => {}
            Err(error) => warn!(
                target: HANDLERS_TARGET,
                statement = %statement_id,
                connection = %statement.connection_id,
                %error,
                "finished statement not detached from its connection"
            ),
        }
        Ok(json!({"finished": true}))
    }

    fn disconnect(&self, services: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
        let ConnectionParams { connection_id } = parse_params(params)?;
        let detached = services.registry().with_handle(
            &connection_id,
            HandleKind::Connection,
            |state: &mut ConnectionState| {
                (std::mem::take(&mut state.statements), state.driver.clone())
            },
        );
        let (statements, driver) = match detached {
            Ok(detached) => detached,
            Err(RegistryError::NotFound { .. }) => return Ok(json!({"disconnected": false})),
            Err(error) => return Err(error.into()),
        };
        let closed = statements
            .iter()
            .filter(|id| services.registry().destroy_kind(id, HandleKind::Statement))
            .count();
        if !services.cache().invalidate_handle(&connection_id) {
            services.registry().destroy(&connection_id);
        }
        debug!(
            target: HANDLERS_TARGET,
            connection = %connection_id,
            %driver,
            statements = closed,
            "database connection closed"
        );
        Ok(json!({"disconnected": true, "statements_closed": closed}))
    }
}

/// Runs `operation` on the connection's state and converts driver errors.
///
/// A connection-level error evicts the connection from the cache after the
/// handle lock has been released.
fn with_connection<R, F>(
    services: &BrokerServices,
    connection_id: &HandleId,
    operation: F,
) -> Result<R, HandlerError>
where
    F: FnOnce(&mut ConnectionState) -> Result<R, DriverError>,
{
    let outcome =
        services
            .registry()
            .with_handle(connection_id, HandleKind::Connection, operation)?;
    outcome.map_err(|error| {
        if error.is_connection() && services.cache().invalidate_handle(connection_id) {
            warn!(
                target: HANDLERS_TARGET,
                connection = %connection_id,
                %error,
                "cached connection invalidated after driver failure"
            );
        }
        HandlerError::failed(error.to_string())
    })
}

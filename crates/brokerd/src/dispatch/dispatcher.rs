//! The request pipeline: validate, admit, execute, record.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::governor::Outcome;
use crate::services::BrokerServices;

use super::errors::BrokerError;
use super::response::BrokerResponse;
use super::router::{DISPATCH_TARGET, HandlerTable};

/// Modules still served once shutdown has been requested. They only read
/// broker state, so clients can watch the drain.
const DRAINING_MODULES: [&str; 2] = ["system", "test"];

/// Lifecycle of one request.
///
/// `Rejected` is reachable from `Received` (gate) and `Validated`
/// (shutdown or governor) and never passes through `Executing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Decoded, not yet checked.
    Received,
    /// Passed the security gate.
    Validated,
    /// Holds an admission permit.
    Admitted,
    /// Handler running.
    Executing,
    /// Handler returned a result.
    Completed,
    /// Handler returned an error or panicked.
    Failed,
    /// Refused by the gate or the governor.
    Rejected,
}

/// Outcome of [`Dispatcher::dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    /// Reply for the client.
    pub response: BrokerResponse,
    /// Terminal state reached.
    pub state: RequestState,
    /// Time spent in the dispatcher.
    pub elapsed: Duration,
}

/// Routes validated, admitted requests to their handlers.
#[derive(Debug)]
pub struct Dispatcher {
    services: Arc<BrokerServices>,
    table: Arc<HandlerTable>,
}

impl Dispatcher {
    /// Creates a dispatcher over `table`. The services' security gate must
    /// have been built from the same table.
    #[must_use]
    pub fn new(services: Arc<BrokerServices>, table: Arc<HandlerTable>) -> Self {
        Self { services, table }
    }

    /// Shared broker services.
    #[must_use]
    pub fn services(&self) -> &Arc<BrokerServices> {
        &self.services
    }

    /// Runs one decoded request through the pipeline.
    pub fn dispatch(&self, raw: &Value) -> Dispatched {
        let started = Instant::now();
        let finish = |response: BrokerResponse, state: RequestState| Dispatched {
            response,
            state,
            elapsed: started.elapsed(),
        };

        let request = match self.services.security().validate(raw) {
            Ok(request) => request,
            Err(error) => {
                debug!(target: DISPATCH_TARGET, %error, "request rejected by gate");
                let error = BrokerError::from(error);
                return finish(BrokerResponse::failure(&error), RequestState::Rejected);
            }
        };
        let method = request.method();

        if self.services.shutdown().is_fired()
            && !DRAINING_MODULES.contains(&request.module.as_str())
        {
            debug!(target: DISPATCH_TARGET, %method, "request refused during shutdown");
            let error = BrokerError::ShuttingDown { method };
            return finish(BrokerResponse::failure(&error), RequestState::Rejected);
        }

        let permit = match self.services.governor().admit() {
            Ok(permit) => permit,
            Err(error) => {
                debug!(target: DISPATCH_TARGET, %method, %error, "request throttled");
                let error = BrokerError::from(error);
                return finish(BrokerResponse::failure(&error), RequestState::Rejected);
            }
        };

        let Some(handler) = self.table.resolve(&request.module, &request.function) else {
            permit.finish(Outcome::Failed);
            let error = BrokerError::internal(format!("no handler registered for {method}"));
            warn!(target: DISPATCH_TARGET, %method, "whitelisted method has no handler");
            return finish(BrokerResponse::failure(&error), RequestState::Failed);
        };

        debug!(target: DISPATCH_TARGET, %method, "executing request");
        let result = catch_unwind(AssertUnwindSafe(|| {
            handler.call(&self.services, &request.params)
        }));

        match result {
            Ok(Ok(value)) => {
                permit.finish(Outcome::Completed);
                debug!(
                    target: DISPATCH_TARGET,
                    %method,
                    elapsed_ms = started.elapsed().as_millis(),
                    "request completed"
                );
                finish(BrokerResponse::success(value), RequestState::Completed)
            }
            Ok(Err(source)) => {
                permit.finish(Outcome::Failed);
                let error = BrokerError::handler(&request.module, &request.function, source);
                debug!(target: DISPATCH_TARGET, %method, %error, "request failed");
                finish(BrokerResponse::failure(&error), RequestState::Failed)
            }
            Err(panic) => {
                permit.finish(Outcome::Failed);
                let error = BrokerError::Panicked {
                    method: method.clone(),
                    message: panic_message(panic.as_ref()),
                };
                warn!(target: DISPATCH_TARGET, %method, %error, "handler panicked");
                finish(BrokerResponse::failure(&error), RequestState::Failed)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}

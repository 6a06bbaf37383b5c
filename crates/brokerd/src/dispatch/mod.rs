//! Request dispatch.
//!
//! Clients send one JSON object per line and receive one JSON object per
//! line in return:
//!
//! ```json
//! {"module":"test","function":"ping","params":{"n":1}}
//! ```
//!
//! ```json
//! {"success":true,"result":{"message":"pong","echo":{"n":1}},"error":null}
//! ```
//!
//! A failed request carries `success: false`, a readable `error` and an
//! `error_kind` of `validation`, `throttle`, `handler`, `not_found` or
//! `internal`.
//!
//! Every request passes the security gate, then the resource governor, and
//! only then reaches the handler registered for its exact
//! `(module, function)` pair in the [`HandlerTable`].

mod dispatcher;
mod errors;
mod handler;
mod request;
mod response;
mod router;

pub use self::dispatcher::{Dispatched, Dispatcher, RequestState};
pub use self::errors::{BrokerError, ErrorKind, HandlerError};
pub use self::handler::{BrokerConnectionHandler, MAX_CONSECUTIVE_FRAMING_ERRORS};
pub use self::request::{BrokerRequest, decode_frame};
pub use self::response::BrokerResponse;
pub use self::router::{Handler, HandlerTable, parse_params};

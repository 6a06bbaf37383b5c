//! Handler modules shipped with the broker.
//!
//! Each module exposes a `register` function adding its functions to a
//! [`HandlerTable`](crate::dispatch::HandlerTable). The `database` module
//! needs a [`DatabaseDriver`](database::DatabaseDriver) and is only
//! registered when one is supplied.

pub mod admin;
pub mod database;
pub mod lockfile;

pub(crate) const HANDLERS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::handlers");

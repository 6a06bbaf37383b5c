//! Handler registration and lookup.
//!
//! Dispatch never resolves names dynamically: every callable function is
//! registered up front in a [`HandlerTable`], and the security gate's
//! whitelist is derived from the same table.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::services::BrokerServices;

use super::errors::HandlerError;

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// A callable broker function.
pub trait Handler: Send + Sync {
    /// Runs the function with validated parameters.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] when the operation fails; the dispatcher
    /// reports it as `module.function failed: <message>`.
    fn call(&self, services: &BrokerServices, params: &Value) -> Result<Value, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&BrokerServices, &Value) -> Result<Value, HandlerError> + Send + Sync,
{
    fn call(&self, services: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
        self(services, params)
    }
}

/// Deserialises handler parameters.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] when `params` does not match `T`.
pub fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T, HandlerError> {
    T::deserialize(params).map_err(HandlerError::from)
}

/// Registration table mapping `(module, function)` to handlers.
#[derive(Default, Clone)]
pub struct HandlerTable {
    handlers: BTreeMap<(String, String), Arc<dyn Handler>>,
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_set()
            .entries(self.handlers.keys().map(|(module, function)| format!("{module}.{function}")))
            .finish()
    }
}

impl HandlerTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`, replacing any previous registration.
    pub fn register<H>(
        &mut self,
        module: impl Into<String>,
        function: impl Into<String>,
        handler: H,
    ) -> &mut Self
    where
        H: Handler + 'static,
    {
        self.handlers
            .insert((module.into(), function.into()), Arc::new(handler));
        self
    }

    /// Handler registered for the exact pair.
    #[must_use]
    pub fn resolve(&self, module: &str, function: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .get(&(module.to_owned(), function.to_owned()))
            .map(Arc::clone)
    }

    /// Registered pairs, sorted.
    pub fn whitelist(&self) -> impl Iterator<Item = (&str, &str)> {
        self.handlers
            .keys()
            .map(|(module, function)| (module.as_str(), function.as_str()))
    }

    /// Distinct module names, sorted.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        let mut modules: Vec<String> = self
            .handlers
            .keys()
            .map(|(module, _)| module.clone())
            .collect();
        modules.dedup();
        modules
    }

    /// Number of registered functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

//! Pre-dispatch request validation.
//!
//! The gate runs before the governor and the registry: a rejected request
//! consumes no admission slot and touches no handle. Checks run in a fixed
//! order and stop at the first failure:
//!
//! 1. `module` and `function` are non-empty `[A-Za-z0-9_]+` strings naming a
//!    registered handler.
//! 2. The function name is not on the denylist.
//! 3. `params` respects the structural [`GateLimits`].
//! 4. Every string (and object key) in `params` is free of script,
//!    SQL-injection and path-traversal signatures. Values under SQL-text keys
//!    skip only the SQL signatures.
//!
//! Every rejection is recorded exactly once in the [`SecurityMonitor`].

mod errors;
mod events;
mod limits;
mod patterns;

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::dispatch::BrokerRequest;

use self::patterns::{NAME, Screening, classify};

pub use self::errors::ValidationError;
pub use self::events::{
    RECENT_EVENT_CAPACITY, SecurityEvent, SecurityEventKind, SecurityMonitor, SecuritySnapshot,
};
pub use self::limits::GateLimits;

pub(crate) const SECURITY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::security");

const DENIED_SUBSTRINGS: [&str; 4] = ["__", "eval", "import", "subprocess"];
const DENIED_NAMES: [&str; 4] = ["exec", "open", "file", "system"];
const DEFAULT_SQL_KEYS: [&str; 2] = ["sql", "statement"];

/// Validates raw requests against the whitelist and content rules.
#[derive(Debug)]
pub struct SecurityGate {
    whitelist: HashMap<String, HashSet<String>>,
    limits: GateLimits,
    sql_keys: HashSet<String>,
    monitor: SecurityMonitor,
}

impl SecurityGate {
    /// Builds a gate admitting exactly the given `(module, function)` pairs.
    pub fn new<I, M, F>(whitelist: I, limits: GateLimits) -> Self
    where
        I: IntoIterator<Item = (M, F)>,
        M: Into<String>,
        F: Into<String>,
    {
        let mut modules: HashMap<String, HashSet<String>> = HashMap::new();
        for (module, function) in whitelist {
            modules
                .entry(module.into())
                .or_default()
                .insert(function.into());
        }
        Self {
            whitelist: modules,
            limits,
            sql_keys: DEFAULT_SQL_KEYS.iter().map(|key| (*key).to_owned()).collect(),
            monitor: SecurityMonitor::new(),
        }
    }

    /// Replaces the keys whose values carry SQL text.
    #[must_use]
    pub fn with_sql_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.sql_keys = keys
            .into_iter()
            .map(|key| key.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// Rejection counters and history.
    #[must_use]
    pub fn monitor(&self) -> &SecurityMonitor {
        &self.monitor
    }

    /// Structural limits in force.
    #[must_use]
    pub fn limits(&self) -> GateLimits {
        self.limits
    }

    /// Whether a handler is registered for the pair.
    #[must_use]
    pub fn is_allowed(&self, module: &str, function: &str) -> bool {
        self.whitelist
            .get(module)
            .is_some_and(|functions| functions.contains(function))
    }

    /// Validates a decoded request document.
    ///
    /// # Errors
    ///
    /// Returns the first failed check; the rejection has already been
    /// recorded in the monitor.
    pub fn validate(&self, raw: &Value) -> Result<BrokerRequest, ValidationError> {
        let outcome = self.check(raw);
        if let Err(error) = &outcome {
            self.monitor.record(error.kind(), error.to_string());
        }
        outcome
    }

    fn check(&self, raw: &Value) -> Result<BrokerRequest, ValidationError> {
        let module = required_name(raw, "module")?;
        let function = required_name(raw, "function")?;
        if !self.is_allowed(module, function) {
            return Err(ValidationError::NotWhitelisted {
                module: module.to_owned(),
                function: function.to_owned(),
            });
        }
        if is_denied(function) {
            return Err(ValidationError::DeniedFunction {
                function: function.to_owned(),
            });
        }

        let params = match raw.get("params") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(params) => params.clone(),
        };
        self.check_structure(&params)?;
        self.screen(&params, "params", Screening { sql: true })?;

        Ok(BrokerRequest {
            module: module.to_owned(),
            function: function.to_owned(),
            params,
        })
    }

    fn check_structure(&self, params: &Value) -> Result<(), ValidationError> {
        let top_level = match params {
            Value::Object(map) => map.len(),
            Value::Array(items) => items.len(),
            _ => 1,
        };
        if top_level > self.limits.max_params {
            return Err(ValidationError::structure(format!(
                "{top_level} parameters exceeds the limit of {}",
                self.limits.max_params
            )));
        }
        self.check_value(params, 1)
    }

    fn check_value(&self, value: &Value, depth: usize) -> Result<(), ValidationError> {
        let limits = &self.limits;
        match value {
            Value::String(text) => self.check_string(text),
            Value::Array(items) => {
                check_depth(depth, limits.max_depth)?;
                if items.len() > limits.max_array_len {
                    return Err(ValidationError::structure(format!(
                        "array of {} elements exceeds the limit of {}",
                        items.len(),
                        limits.max_array_len
                    )));
                }
                items
                    .iter()
                    .try_for_each(|item| self.check_value(item, depth + 1))
            }
            Value::Object(map) => {
                check_depth(depth, limits.max_depth)?;
                map.iter().try_for_each(|(key, item)| {
                    self.check_string(key)?;
                    self.check_value(item, depth + 1)
                })
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
        }
    }

    fn check_string(&self, text: &str) -> Result<(), ValidationError> {
        if text.len() > self.limits.max_string_bytes {
            return Err(ValidationError::structure(format!(
                "string of {} bytes exceeds the limit of {}",
                text.len(),
                self.limits.max_string_bytes
            )));
        }
        Ok(())
    }

    fn screen(
        &self,
        value: &Value,
        location: &str,
        screening: Screening,
    ) -> Result<(), ValidationError> {
        match value {
            Value::String(text) => flag(text, location, screening),
            Value::Array(items) => items.iter().enumerate().try_for_each(|(index, item)| {
                self.screen(item, &format!("{location}[{index}]"), screening)
            }),
            Value::Object(map) => map.iter().try_for_each(|(key, item)| {
                let child = format!("{location}.{key}");
                flag(key, &child, Screening { sql: true })?;
                let sql = screening.sql && !self.sql_keys.contains(&key.to_ascii_lowercase());
                self.screen(item, &child, Screening { sql })
            }),
            Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
        }
    }
}

fn required_name<'a>(raw: &'a Value, field: &'static str) -> Result<&'a str, ValidationError> {
    let name = raw
        .get(field)
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or(ValidationError::MissingField { field })?;
    if !NAME.is_match(name) {
        return Err(ValidationError::InvalidName { field });
    }
    Ok(name)
}

fn is_denied(function: &str) -> bool {
    let lowered = function.to_ascii_lowercase();
    DENIED_SUBSTRINGS
        .iter()
        .any(|pattern| lowered.contains(pattern))
        || DENIED_NAMES.contains(&lowered.as_str())
}

fn check_depth(depth: usize, max_depth: usize) -> Result<(), ValidationError> {
    if depth > max_depth {
        return Err(ValidationError::structure(format!(
            "nesting depth exceeds the limit of {max_depth}"
        )));
    }
    Ok(())
}

fn flag(text: &str, location: &str, screening: Screening) -> Result<(), ValidationError> {
    match classify(text, screening) {
        Some(kind) => Err(ValidationError::SuspiciousContent {
            kind,
            location: location.to_owned(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests;

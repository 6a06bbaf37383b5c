//! Connection fingerprints: stable keys for "the same logical connection".

use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of a canonical connection description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest of an arbitrary canonical JSON document.
    #[must_use]
    pub fn of_value(value: &Value) -> Self {
        let canonical = canonicalize_value(value);
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Hex string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Connection-shaping parameters as sent by clients.
#[derive(Clone, Deserialize)]
pub struct ConnectionSpec {
    /// Driver name; inferred from a `dbi:<driver>:` DSN prefix when absent.
    #[serde(default, alias = "db_type")]
    pub driver: Option<String>,
    /// Data source name.
    pub dsn: String,
    /// Login name.
    #[serde(default)]
    pub username: String,
    /// Login secret.
    #[serde(default)]
    pub password: String,
    /// Driver options such as `AutoCommit`.
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConnectionSpec")
            .field("driver", &self.driver())
            .field("dsn", &self.dsn)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

impl ConnectionSpec {
    /// Effective driver name.
    #[must_use]
    pub fn driver(&self) -> String {
        if let Some(driver) = self.driver.as_deref().filter(|name| !name.is_empty()) {
            return driver.to_owned();
        }
        let mut parts = self.dsn.splitn(3, ':');
        match (parts.next(), parts.next()) {
            (Some(scheme), Some(driver)) if scheme.eq_ignore_ascii_case("dbi") => {
                driver.to_owned()
            }
            _ => String::new(),
        }
    }

    /// Fingerprint used by the connection cache.
    ///
    /// The password only participates when `include_secrets` is set.
    #[must_use]
    pub fn fingerprint(&self, include_secrets: bool) -> Fingerprint {
        let mut document = json!({
            "driver": self.driver(),
            "dsn": self.dsn,
            "username": self.username,
            "options": normalise_flags(&Value::Object(self.options.clone())),
        });
        if include_secrets && let Value::Object(map) = &mut document {
            map.insert("password".to_owned(), Value::String(self.password.clone()));
        }
        Fingerprint::of_value(&document)
    }
}

fn canonicalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys = map.keys().cloned().collect::<Vec<_>>();
            keys.sort();
            let mut normalized = Map::new();
            for key in keys {
                if let Some(inner) = map.get(&key) {
                    normalized.insert(key, canonicalize_value(inner));
                }
            }
            Value::Object(normalized)
        }
        Value::Array(values) => Value::Array(values.iter().map(canonicalize_value).collect()),
        _ => value.clone(),
    }
}

// `AutoCommit => 1` and `AutoCommit => true` describe the same connection.
fn normalise_flags(value: &Value) -> Value {
    match value {
        Value::Bool(flag) => Value::from(u8::from(*flag)),
        Value::Number(number) => match number.as_u64() {
            Some(flag @ (0 | 1)) => Value::from(flag),
            _ => value.clone(),
        },
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| (key.clone(), normalise_flags(inner)))
                .collect(),
        ),
        Value::Array(values) => Value::Array(values.iter().map(normalise_flags).collect()),
        _ => value.clone(),
    }
}

//! Request decoding.
//!
//! A frame is decoded into a raw JSON document first; the security gate then
//! turns the document into a typed [`BrokerRequest`]. Keeping the two steps
//! apart lets the gate see exactly what the client sent.

use serde::Serialize;
use serde_json::Value;

use super::errors::BrokerError;

/// Validated request, produced only by the security gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokerRequest {
    /// Handler module.
    pub module: String,
    /// Function within the module.
    pub function: String,
    /// Parameters; `{}` when the client sent none.
    pub params: Value,
}

impl BrokerRequest {
    /// `module.function`, as used in logs and error messages.
    #[must_use]
    pub fn method(&self) -> String {
        format!("{}.{}", self.module, self.function)
    }
}

/// Decodes a frame into a JSON document.
///
/// # Errors
///
/// Returns [`BrokerError::Internal`] when the frame is empty or not valid
/// JSON.
pub fn decode_frame(frame: &[u8]) -> Result<Value, BrokerError> {
    let trimmed = frame.trim_ascii();
    if trimmed.is_empty() {
        return Err(BrokerError::internal("empty request"));
    }
    serde_json::from_slice(trimmed)
        .map_err(|error| BrokerError::internal(format!("malformed request JSON: {error}")))
}

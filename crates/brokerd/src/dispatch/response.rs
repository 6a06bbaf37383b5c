//! Response envelope and writer.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::{BrokerError, ErrorKind};

/// Reply to one request. Exactly one of `result` and `error` is non-null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerResponse {
    /// Whether the request succeeded.
    pub success: bool,
    /// Handler result; `null` on failure.
    pub result: Value,
    /// Failure message; `null` on success.
    pub error: Option<String>,
    /// Failure category; omitted on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl BrokerResponse {
    /// Successful reply. A `null` result is sent as `{}` so that success
    /// responses always carry a non-null result.
    #[must_use]
    pub fn success(result: Value) -> Self {
        let result = match result {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Self {
            success: true,
            result,
            error: None,
            error_kind: None,
        }
    }

    /// Failed reply.
    #[must_use]
    pub fn failure(error: &BrokerError) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }
}

/// Writes responses as JSONL.
pub(crate) struct ResponseWriter<W> {
    writer: W,
}

impl<W: Write> ResponseWriter<W> {
    pub(crate) fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one response line and flushes.
    pub(crate) fn write_response(&mut self, response: &BrokerResponse) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, response)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn written(response: &BrokerResponse) -> Value {
        let mut output = Vec::new();
        ResponseWriter::new(&mut output)
            .write_response(response)
            .expect("write response");
        assert_eq!(output.last(), Some(&b'\n'));
        serde_json::from_slice(&output).expect("valid json")
    }

    #[test]
    fn success_has_null_error() {
        let value = written(&BrokerResponse::success(json!({"message": "pong"})));
        assert_eq!(
            value,
            json!({"success": true, "result": {"message": "pong"}, "error": null})
        );
    }

    #[test]
    fn null_result_becomes_empty_object() {
        let response = BrokerResponse::success(Value::Null);
        assert_eq!(response.result, json!({}));
    }

    #[test]
    fn failure_has_null_result_and_kind() {
        let value = written(&BrokerResponse::failure(&BrokerError::internal("boom")));
        assert_eq!(
            value,
            json!({
                "success": false,
                "result": null,
                "error": "internal error: boom",
                "error_kind": "internal"
            })
        );
    }
}

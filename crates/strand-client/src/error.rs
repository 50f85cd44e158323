// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request failures seen by callers.

use serde_json::Value;
use thiserror::Error;

/// Why a data request did not produce a result.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RequestError {
    /// No handler acknowledged the request in time.
    #[error("data request {service}.{method} went unhandled")]
    Timeout {
        /// Service called.
        service: String,
        /// Method called.
        method: String,
    },
    /// The handler failed with a message.
    #[error("{0}")]
    Handler(String),
    /// The handler failed with a structured error body.
    #[error("request failed: {0}")]
    Remote(Value),
    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
    /// The worker is gone.
    #[error("worker disconnected")]
    Disconnected,
    /// The request was malformed and never sent.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl RequestError {
    /// Error carried by a failed `DataResponse`.
    pub fn from_wire(error: Value) -> Self {
        match error {
            Value::String(message) => Self::Handler(message),
            other => Self::Remote(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_errors_are_handler_messages() {
        assert_eq!(
            RequestError::from_wire(json!("boom")),
            RequestError::Handler("boom".into())
        );
        assert_eq!(
            RequestError::from_wire(json!({"status": 500})),
            RequestError::Remote(json!({"status": 500}))
        );
    }
}

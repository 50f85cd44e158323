// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transport failures.

use serde_json::{json, Value};
use thiserror::Error;

/// Why an Ajax call failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AjaxError {
    /// No response arrived (connection refused, reset, DNS, …). The detail is
    /// kept for logs only.
    #[error("Network Error")]
    Network(String),
    /// A 200 response whose body was not valid JSON.
    #[error("{0}")]
    Parse(String),
    /// Non-200 response carrying a JSON error body.
    #[error("request failed: {0}")]
    Remote(Value),
    /// Non-200 response without a JSON body.
    #[error("request failed with status {status} {status_text}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Reason phrase.
        status_text: String,
    },
    /// The request could not be built (bad method, URL or multipart part).
    #[error("invalid request: {0}")]
    Build(String),
}

impl AjaxError {
    /// JSON form handed back to data-request callers: the error body itself,
    /// `{status, statusText}`, or the message string.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Remote(body) => body.clone(),
            Self::Status {
                status,
                status_text,
            } => json!({"status": status, "statusText": status_text}),
            other => Value::String(other.to_string()),
        }
    }
}

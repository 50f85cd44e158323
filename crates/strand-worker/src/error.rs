// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Worker error type.

use serde_json::{json, Value};
use strand_registry::RegistryError;
use strand_store::StoreError;
use strand_transport::AjaxError;
use thiserror::Error;

/// Failure of a service call or of worker start-up.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No service answers to this name.
    #[error("no service named {0}")]
    UnknownService(String),
    /// The service has no such method.
    #[error("service {service} has no method {method}")]
    UnknownMethod {
        /// Service name.
        service: String,
        /// Requested method.
        method: String,
    },
    /// Arguments did not fit the method.
    #[error("bad arguments for {service}.{method}: {reason}")]
    InvalidArgs {
        /// Service name.
        service: String,
        /// Method name.
        method: String,
        /// What was wrong.
        reason: String,
    },
    /// The backend call failed.
    #[error(transparent)]
    Transport(#[from] AjaxError),
    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Extension point setup failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ServiceError {
    /// Error value sent back in a failed `DataResponse`.
    ///
    /// Structured backend bodies pass through; status failures become
    /// `{status, statusText}`; everything else is its message.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Transport(AjaxError::Remote(body)) => body.clone(),
            Self::Transport(AjaxError::Status {
                status,
                status_text,
            }) => json!({ "status": status, "statusText": status_text }),
            other => Value::String(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_bodies_pass_through() {
        let err = ServiceError::from(AjaxError::Remote(json!({"error": "nope"})));
        assert_eq!(err.to_wire(), json!({"error": "nope"}));
    }

    #[test]
    fn status_failures_keep_their_shape() {
        let err = ServiceError::from(AjaxError::Status {
            status: 503,
            status_text: "Service Unavailable".into(),
        });
        assert_eq!(
            err.to_wire(),
            json!({"status": 503, "statusText": "Service Unavailable"})
        );
    }

    #[test]
    fn other_errors_are_strings() {
        let err = ServiceError::UnknownService("nowhere".into());
        assert_eq!(err.to_wire(), json!("no service named nowhere"));
    }
}

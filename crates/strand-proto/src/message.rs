// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Frames exchanged between the main thread and the worker.
//!
//! Both directions are FIFO per sender: the worker applies main-thread frames
//! in the order they were sent, and the mirror applies worker frames likewise.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Action;

/// Correlation id for a data request; monotonically increasing per client.
pub type RequestId = u64;

/// `service.method(args…)` call issued by UI code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    /// Correlation id assigned by the request router.
    pub request_id: RequestId,
    /// Worker-side service name (e.g. `vertex`).
    pub service: String,
    /// Method exported by the service (e.g. `multiple`).
    pub method: String,
    /// Positional arguments, forwarded verbatim.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Settlement of a [`DataRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataResponse {
    /// Correlation id of the request being settled.
    pub request_id: RequestId,
    /// `true` when `result` is meaningful.
    pub success: bool,
    /// Result value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error value on failure: a string or a structured error body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl DataResponse {
    /// Successful settlement.
    pub fn ok(request_id: RequestId, result: Value) -> Self {
        Self {
            request_id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Failed settlement.
    pub fn err(request_id: RequestId, error: Value) -> Self {
        Self {
            request_id,
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// Split into the result or the error value.
    pub fn into_result(self) -> Result<Value, Value> {
        if self.success {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(self.error.unwrap_or(Value::Null))
        }
    }
}

/// Per-session values the worker stamps onto outgoing HTTP requests and uses
/// to recognise its own socket echoes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    /// Workspace the UI is looking at.
    #[serde(default)]
    pub current_workspace_id: Option<String>,
    /// CSRF token for state-changing requests.
    #[serde(default)]
    pub csrf_token: Option<String>,
    /// This client's socket source guid.
    #[serde(default)]
    pub socket_source_guid: Option<String>,
    /// Ask the server to trace request handling.
    #[serde(default)]
    pub graph_trace_enable: bool,
}

/// Main thread → worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MainMessage {
    /// Start a service call.
    DataRequest(DataRequest),
    /// Caller lost interest in a request; its completion is suppressed.
    #[serde(rename_all = "camelCase")]
    DataRequestCancel {
        /// Request being cancelled.
        request_id: RequestId,
    },
    /// Action dispatched on the mirror, relayed for real application.
    StoreAction {
        /// The relayed action.
        action: Action,
    },
    /// Raw server-push frame received on the socket.
    SocketMessage {
        /// JSON text of the frame.
        body: String,
    },
    /// Replace the session context.
    UpdateContext(SessionContext),
}

/// Worker → main thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// First frame after start-up: the full canonical state.
    StoreInit {
        /// Serialized root state.
        state: Value,
    },
    /// Worker-authored action for the mirror (normally `STATE_APPLY_DIFF`).
    StoreAction {
        /// The action, tagged with the worker originator.
        action: Action,
    },
    /// The worker picked up a request; the router stops its timeout.
    #[serde(rename_all = "camelCase")]
    DataRequestStarted {
        /// Acknowledged request.
        request_id: RequestId,
    },
    /// Progress of a long-running request, in `0.0..1.0`.
    #[serde(rename_all = "camelCase")]
    DataRequestProgress {
        /// Request reporting progress.
        request_id: RequestId,
        /// Fraction complete.
        progress: f64,
    },
    /// Settlement of a request.
    DataRequestCompleted(DataResponse),
    /// UI-level event raised by a socket message.
    #[serde(rename_all = "camelCase")]
    Rebroadcast {
        /// Event name (e.g. `sessionExpiration`).
        event_name: String,
        /// Event payload.
        data: Value,
    },
}

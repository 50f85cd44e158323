// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Message vocabulary shared by the strand worker and its main-thread mirror.
//!
//! Three families of types live here:
//!
//! * [`Action`] – the store action carried in both directions across the bridge.
//! * [`MainMessage`] / [`WorkerMessage`] – the typed frames exchanged over the
//!   worker channel (data requests, store traffic, socket frames).
//! * [`patch`] / [`socket`] – JSON-patch operations with the diff used to
//!   mirror state, and the server-push envelope format.

pub mod message;
pub mod patch;
pub mod socket;

pub use message::{
    DataRequest, DataResponse, MainMessage, RequestId, SessionContext, WorkerMessage,
};
pub use patch::{diff, PatchError, PatchOp};
pub use socket::{SocketEnvelope, SocketFrame};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Action type carrying a list of [`PatchOp`]s from the worker store to the mirror.
pub const STATE_APPLY_DIFF: &str = "STATE_APPLY_DIFF";

/// Originator tag stamped on actions produced by the worker.
pub const WORKER_ORIGINATOR: &str = "webworker";

/// Errors raised while decoding wire frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// Body was not valid JSON for the expected shape.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    /// A `batch` envelope whose `data` is not an array.
    #[error("batch envelope without an array payload")]
    MalformedBatch,
    /// Action had the wrong type for the requested decoding.
    #[error("expected action {expected}, got {actual}")]
    UnexpectedAction {
        /// Action type the caller asked for.
        expected: &'static str,
        /// Action type actually present.
        actual: String,
    },
}

/// Metadata attached to an [`Action`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionMeta {
    /// Who produced the action; `Some("webworker")` for worker-authored traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originator: Option<String>,
}

impl ActionMeta {
    fn is_empty(&self) -> bool {
        self.originator.is_none()
    }
}

/// Flux-style store action: a type string plus an arbitrary JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    /// Action type, e.g. `ELEMENT_UPDATE`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Action payload (`null` when absent).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    /// Routing metadata.
    #[serde(default, skip_serializing_if = "ActionMeta::is_empty")]
    pub meta: ActionMeta,
}

impl Action {
    /// Build an untagged action.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            meta: ActionMeta::default(),
        }
    }

    /// Build an action with no payload.
    pub fn bare(kind: impl Into<String>) -> Self {
        Self::new(kind, Value::Null)
    }

    /// Build the `STATE_APPLY_DIFF` action for a list of patch operations,
    /// already tagged as worker traffic.
    pub fn apply_diff(ops: &[PatchOp]) -> Result<Self, WireError> {
        let payload = serde_json::to_value(ops)?;
        Ok(Self::new(STATE_APPLY_DIFF, payload).by_worker())
    }

    /// Tag the action as originating in the worker.
    pub fn by_worker(mut self) -> Self {
        self.meta.originator = Some(WORKER_ORIGINATOR.to_owned());
        self
    }

    /// True when the action was produced by the worker and must not be relayed back.
    pub fn is_from_worker(&self) -> bool {
        self.meta.originator.as_deref() == Some(WORKER_ORIGINATOR)
    }

    /// Decode the patch list of a `STATE_APPLY_DIFF` action.
    pub fn diff_ops(&self) -> Result<Vec<PatchOp>, WireError> {
        if self.kind != STATE_APPLY_DIFF {
            return Err(WireError::UnexpectedAction {
                expected: STATE_APPLY_DIFF,
                actual: self.kind.clone(),
            });
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Payload as an object, if it is one.
    pub fn payload_object(&self) -> Option<&Map<String, Value>> {
        self.payload.as_object()
    }

    /// String field of the payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

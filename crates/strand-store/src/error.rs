// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Store error type.

use strand_proto::WireError;
use strand_registry::RegistryError;
use strand_transport::AjaxError;
use thiserror::Error;

/// Failures surfaced by store dispatch and async commands.
#[derive(Debug, Error)]
pub enum StoreError {
    /// State could not be serialized for diffing.
    #[error("state serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Diff action could not be built.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// Backend call failed.
    #[error("backend call failed: {0}")]
    Transport(#[from] AjaxError),
    /// Extension registration failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Action or response payload did not have the expected shape.
    #[error("invalid payload for {kind}: {reason}")]
    InvalidPayload {
        /// Action type or route being decoded.
        kind: String,
        /// What was wrong.
        reason: String,
    },
    /// Command needs a current workspace and none is set.
    #[error("no current workspace")]
    NoWorkspace,
    /// Outbound channel to the main thread is closed.
    #[error("main thread is gone")]
    Disconnected,
}

impl StoreError {
    pub(crate) fn invalid(kind: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidPayload {
            kind: kind.into(),
            reason: reason.to_string(),
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Root state tree and the core reducer.
//!
//! Slices are plain serde structs; the JSON form of [`RootState`] is exactly
//! what the main-thread mirror holds, so every field name here is part of the
//! wire contract.

use serde::de::DeserializeOwned;
use serde::Serialize;
use strand_proto::Action;
use tracing::warn;

use crate::configuration::{ConfigurationState, ScreenState};
use crate::element::ElementState;
use crate::graph::GraphState;
use crate::ontology::OntologyState;
use crate::product::ProductState;
use crate::undo::UndoHistory;
use crate::workspace::WorkspaceState;

/// Whole worker-side state.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RootState {
    /// Workspaces and the current selection.
    pub workspace: WorkspaceState,
    /// Normalized vertices and edges, per workspace.
    pub element: ElementState,
    /// Products (graph/map/table views), per workspace.
    pub product: ProductState,
    /// Graph product ephemera (ghost animations).
    pub graph: GraphState,
    /// Undo/redo stacks per scope.
    pub undo_action_history: UndoHistory,
    /// Display metrics.
    pub screen: ScreenState,
    /// Server configuration properties and messages.
    pub configuration: ConfigurationState,
    /// Ontology per workspace.
    pub ontology: OntologyState,
}

impl RootState {
    /// Run every core slice reducer over `action`.
    ///
    /// Extension reducers registered at [`crate::STORE_POINT`] run after this,
    /// from [`crate::Store::dispatch`].
    pub fn reduce(&mut self, action: &Action, undo_limit: Option<usize>) {
        self.workspace.reduce(action);
        self.element.reduce(action);
        self.product.reduce(action);
        self.undo_action_history.reduce(action, undo_limit);
        self.screen.reduce(action);
        self.configuration.reduce(action);
        self.ontology.reduce(action);
    }

    /// Current workspace id.
    pub fn current_workspace(&self) -> Option<&str> {
        self.workspace.current_id.as_deref()
    }
}

/// Decode an action payload, logging and returning `None` on a shape mismatch.
pub(crate) fn payload<T: DeserializeOwned>(action: &Action) -> Option<T> {
    match serde_json::from_value(action.payload.clone()) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            warn!(action = %action.kind, error = %err, "ignoring action with malformed payload");
            None
        }
    }
}

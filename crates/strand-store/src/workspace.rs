// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Workspace slice.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strand_proto::Action;

use crate::state::payload;

/// Selects the current workspace.
pub const WORKSPACE_SET_CURRENT: &str = "WORKSPACE_SET_CURRENT";
/// Stores a workspace record.
pub const WORKSPACE_UPDATE: &str = "WORKSPACE_UPDATE";
/// Drops a workspace record.
pub const WORKSPACE_DELETE: &str = "WORKSPACE_DELETE";

/// Workspace records keyed by id plus the current selection.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceState {
    /// Workspace the session is looking at.
    pub current_id: Option<String>,
    /// Server records keyed by `workspaceId`.
    pub by_id: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceRef {
    workspace_id: Option<String>,
}

#[derive(Deserialize)]
struct WorkspaceRecord {
    workspace: Value,
}

impl WorkspaceState {
    /// Record of the current workspace, if loaded.
    pub fn current(&self) -> Option<&Value> {
        self.current_id.as_ref().and_then(|id| self.by_id.get(id))
    }

    /// False only when the workspace record is loaded and says it is read-only.
    pub fn is_editable(&self, workspace_id: &str) -> bool {
        self.by_id
            .get(workspace_id)
            .and_then(|ws| ws.get("editable"))
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub(crate) fn reduce(&mut self, action: &Action) {
        match action.kind.as_str() {
            WORKSPACE_SET_CURRENT => {
                if let Some(WorkspaceRef { workspace_id }) = payload(action) {
                    self.current_id = workspace_id;
                }
            }
            WORKSPACE_UPDATE => {
                if let Some(WorkspaceRecord { workspace }) = payload(action) {
                    if let Some(id) = workspace.get("workspaceId").and_then(Value::as_str) {
                        self.by_id.insert(id.to_owned(), workspace);
                    }
                }
            }
            WORKSPACE_DELETE => {
                if let Some(WorkspaceRef {
                    workspace_id: Some(id),
                }) = payload(action)
                {
                    self.by_id.remove(&id);
                    if self.current_id.as_deref() == Some(id.as_str()) {
                        self.current_id = None;
                    }
                }
            }
            _ => {}
        }
    }
}

/// `WORKSPACE_SET_CURRENT` action.
pub fn set_current(workspace_id: Option<&str>) -> Action {
    Action::new(WORKSPACE_SET_CURRENT, json!({ "workspaceId": workspace_id }))
}

/// `WORKSPACE_UPDATE` action for a server workspace record.
pub fn update(workspace: Value) -> Action {
    Action::new(WORKSPACE_UPDATE, json!({ "workspace": workspace }))
}

/// `WORKSPACE_DELETE` action.
pub fn delete(workspace_id: &str) -> Action {
    Action::new(WORKSPACE_DELETE, json!({ "workspaceId": workspace_id }))
}

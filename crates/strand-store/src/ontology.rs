// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ontology per workspace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strand_proto::Action;
use strand_transport::{AjaxRequest, Transport};

use crate::state::payload;
use crate::{Store, StoreError};

/// Stores a workspace's ontology.
pub const ONTOLOGY_UPDATE: &str = "ONTOLOGY_UPDATE";

/// Ontology slice keyed by workspace id.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(transparent)]
pub struct OntologyState(pub BTreeMap<String, Value>);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OntologyUpdate {
    workspace_id: String,
    ontology: Value,
}

impl OntologyState {
    pub(crate) fn reduce(&mut self, action: &Action) {
        if action.kind == ONTOLOGY_UPDATE {
            if let Some(OntologyUpdate {
                workspace_id,
                ontology,
            }) = payload(action)
            {
                self.0.insert(workspace_id, ontology);
            }
        }
    }
}

/// Fetch the ontology of `workspace_id` (current workspace when `None`).
pub async fn get(
    store: &Store,
    transport: &dyn Transport,
    workspace_id: Option<String>,
) -> Result<(), StoreError> {
    let workspace_id = match workspace_id {
        Some(id) => id,
        None => store.current_workspace().await?,
    };
    let mut fields = Map::new();
    fields.insert("workspaceId".to_owned(), json!(workspace_id));
    let ontology = transport
        .send(AjaxRequest::get("/ontology").with_fields(fields))
        .await?
        .into_json();
    store.dispatch(Action::new(
        ONTOLOGY_UPDATE,
        json!({ "workspaceId": workspace_id, "ontology": ontology }),
    ))
}

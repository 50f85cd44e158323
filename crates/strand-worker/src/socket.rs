// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Server-push message routing.
//!
//! [`SocketRouter::process`] decodes a frame, drops this client's own echoes
//! and turns every remaining message into [`Reaction`]s: store actions,
//! commands, or events rebroadcast to the main thread. Built-in message types
//! are routed by a fixed table; plugins handle more through [`SOCKET_POINT`].
//! Both paths fire when a plugin names a built-in type.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};
use strand_proto::{Action, SocketEnvelope, SocketFrame, WireError};
use strand_registry::{DocOptions, ExtensionPoint, ExtensionRegistry, RegistryError};
use strand_store::command::{OntologyRequest, ProductRequest};
use strand_store::element::DeleteElements;
use strand_store::{product, workspace, Command};
use tracing::{debug, warn};

/// What the runtime should do about one socket message.
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    /// Run a worker command.
    Command(Command),
    /// Dispatch a reducer action.
    Action(Action),
    /// Forward a UI event to the main thread.
    Rebroadcast {
        /// Event name.
        event_name: String,
        /// Event payload.
        data: Value,
    },
}

impl Reaction {
    fn rebroadcast(event_name: &str, data: Value) -> Self {
        Self::Rebroadcast {
            event_name: event_name.to_owned(),
            data,
        }
    }
}

/// Handler body of a [`SocketHandler`].
pub type HandlerFn = dyn Fn(&Value) -> Vec<Reaction> + Send + Sync;

/// A plugin-provided handler for one message type.
#[derive(Clone)]
pub struct SocketHandler {
    /// Message type handled.
    pub name: String,
    /// Receives the message `data` (`null` when absent).
    pub handler: Arc<HandlerFn>,
}

impl SocketHandler {
    /// Handler for `name`.
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value) -> Vec<Reaction> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for SocketHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Extension point for [`SocketHandler`]s.
pub const SOCKET_POINT: ExtensionPoint<SocketHandler> =
    ExtensionPoint::new("strand.websocket.message");

/// Routes decoded socket messages.
pub struct SocketRouter {
    registry: Arc<ExtensionRegistry>,
    own_guid: Option<String>,
    user_status: HashMap<String, Value>,
}

impl fmt::Debug for SocketRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketRouter")
            .field("own_guid", &self.own_guid)
            .field("user_status", &self.user_status.len())
            .finish_non_exhaustive()
    }
}

fn text<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

impl SocketRouter {
    /// Router reading plugin handlers from `registry`; documents [`SOCKET_POINT`].
    pub fn new(registry: Arc<ExtensionRegistry>) -> Result<Self, RegistryError> {
        registry.document(
            &SOCKET_POINT,
            "Handle websocket messages by type",
            |handler: &SocketHandler| !handler.name.is_empty(),
            DocOptions::default(),
        )?;
        Ok(Self {
            registry,
            own_guid: None,
            user_status: HashMap::new(),
        })
    }

    /// Guid identifying this client's own writes.
    pub fn set_source_guid(&mut self, guid: Option<String>) {
        self.own_guid = guid;
    }

    /// Decode `body` and route every message that is not our own echo.
    pub fn process(
        &mut self,
        body: &str,
        current_workspace: Option<&str>,
    ) -> Result<Vec<Reaction>, WireError> {
        let messages = SocketFrame::parse(body)?.into_messages(self.own_guid.as_deref());
        let mut reactions = Vec::new();
        for message in &messages {
            reactions.extend(self.route(message, current_workspace));
        }
        Ok(reactions)
    }

    fn route(&mut self, message: &SocketEnvelope, current_workspace: Option<&str>) -> Vec<Reaction> {
        debug!(message_type = %message.kind, "socket message");
        let builtin = self.builtin(&message.kind, &message.body(), current_workspace);
        let handlers: Vec<Arc<SocketHandler>> = self
            .registry
            .extensions_for(&SOCKET_POINT)
            .into_iter()
            .filter(|handler| handler.name == message.kind)
            .collect();
        if builtin.is_none() && handlers.is_empty() {
            warn!(message_type = %message.kind, "unhandled socket message type");
            return Vec::new();
        }
        let data = message.data.clone().unwrap_or(Value::Null);
        let mut reactions = builtin.unwrap_or_default();
        for handler in handlers {
            reactions.extend((handler.handler)(&data));
        }
        reactions
    }

    /// `None` when `kind` has no built-in handler.
    fn builtin(
        &mut self,
        kind: &str,
        data: &Value,
        current_workspace: Option<&str>,
    ) -> Option<Vec<Reaction>> {
        let reactions = match kind {
            "workspaceChange" => vec![Reaction::Action(workspace::update(data.clone()))],
            "workspaceDelete" => text(data, "workspaceId")
                .map(|id| Reaction::Action(workspace::delete(id)))
                .into_iter()
                .collect(),
            "ontologyChange" => vec![Reaction::Command(Command::OntologyGet(OntologyRequest {
                workspace_id: text(data, "workspaceId").map(str::to_owned),
            }))],
            "ontologyConceptsChange" => vec![Reaction::Command(Command::OntologyGet(
                OntologyRequest {
                    workspace_id: text(data, "workspaceId")
                        .or(current_workspace)
                        .map(str::to_owned),
                },
            ))],
            "workProductPreviewChange" => {
                match (text(data, "workspaceId"), text(data, "id"), text(data, "md5")) {
                    (Some(workspace_id), Some(id), Some(md5)) => vec![Reaction::Action(
                        product::preview_changed(workspace_id, id, md5),
                    )],
                    _ => Vec::new(),
                }
            }
            "workProductChange" => {
                let skip = text(data, "skipSourceGuid");
                match text(data, "id") {
                    Some(_) if skip.is_some() && skip == self.own_guid.as_deref() => Vec::new(),
                    Some(id) => vec![Reaction::Command(Command::ProductChanged(product_request(id)))],
                    None => Vec::new(),
                }
            }
            "workProductDelete" => text(data, "id")
                .map(|id| Reaction::Command(Command::ProductRemove(product_request(id))))
                .into_iter()
                .collect(),
            "sessionExpiration" => vec![Reaction::rebroadcast("sessionExpiration", Value::Null)],
            "userStatusChange" => self.user_status_change(data),
            "userWorkspaceChange" => Vec::new(),
            "publish" => {
                let property_undo = text(data, "objectType") == Some("property")
                    && text(data, "publishType") == Some("undo");
                if property_undo {
                    Vec::new()
                } else {
                    property_change(data)
                }
            }
            "propertyChange" => property_change(data),
            "verticesDeleted" => {
                let vertex_ids = data
                    .get("vertexIds")
                    .and_then(|ids| serde_json::from_value(ids.clone()).ok())
                    .unwrap_or_default();
                vec![Reaction::Command(Command::ElementDelete(DeleteElements {
                    vertex_ids,
                    edge_ids: Vec::new(),
                }))]
            }
            "edgeDeletion" => text(data, "edgeId")
                .map(|id| {
                    Reaction::Command(Command::ElementDelete(DeleteElements {
                        vertex_ids: Vec::new(),
                        edge_ids: vec![id.to_owned()],
                    }))
                })
                .into_iter()
                .collect(),
            "textUpdated" => {
                let in_scope = text(data, "workspaceId")
                    .is_none_or(|workspace_id| Some(workspace_id) == current_workspace);
                match text(data, "graphVertexId") {
                    Some(vertex_id) if in_scope => vec![Reaction::rebroadcast(
                        "textUpdated",
                        json!({ "vertexId": vertex_id }),
                    )],
                    _ => Vec::new(),
                }
            }
            "longRunningProcessDeleted" => vec![Reaction::rebroadcast(
                "longRunningProcessDeleted",
                json!({ "processId": data }),
            )],
            "longRunningProcessChange" => vec![Reaction::rebroadcast(
                "longRunningProcessChanged",
                json!({ "process": data }),
            )],
            "entityImageUpdated" => {
                if text(data, "graphVertexId").is_some() {
                    property_change(data)
                } else {
                    Vec::new()
                }
            }
            "notification" => vec![Reaction::rebroadcast("notificationActive", data.clone())],
            "systemNotificationUpdated" => {
                vec![Reaction::rebroadcast("notificationUpdated", data.clone())]
            }
            "systemNotificationEnded" => {
                vec![Reaction::rebroadcast("notificationDeleted", data.clone())]
            }
            _ => return None,
        };
        Some(reactions)
    }

    /// Rebroadcast unless the same user reported the same status last time.
    fn user_status_change(&mut self, data: &Value) -> Vec<Reaction> {
        let key = data.get("id").map(Value::to_string).unwrap_or_default();
        if self.user_status.get(&key) == Some(data) {
            return Vec::new();
        }
        self.user_status.insert(key, data.clone());
        vec![Reaction::rebroadcast("userStatusChange", data.clone())]
    }
}

fn product_request(id: &str) -> ProductRequest {
    ProductRequest {
        product_id: id.to_owned(),
        invalidate: false,
    }
}

fn property_change(data: &Value) -> Vec<Reaction> {
    vec![Reaction::Command(Command::ElementPropertyChange(data.clone()))]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> SocketRouter {
        SocketRouter::new(Arc::new(ExtensionRegistry::new())).unwrap()
    }

    fn frame(kind: &str, data: Value) -> String {
        json!({ "type": kind, "data": data }).to_string()
    }

    #[test]
    fn publish_of_a_property_undo_is_ignored() {
        let mut router = router();
        let undo = frame(
            "publish",
            json!({"objectType": "property", "publishType": "undo", "graphVertexId": "v1"}),
        );
        assert!(router.process(&undo, None).unwrap().is_empty());
        let other = frame("publish", json!({"objectType": "vertex", "graphVertexId": "v1"}));
        assert_eq!(router.process(&other, None).unwrap().len(), 1);
    }

    #[test]
    fn user_status_is_deduplicated_per_user() {
        let mut router = router();
        let online = frame("userStatusChange", json!({"id": "u1", "status": "ONLINE"}));
        let other = frame("userStatusChange", json!({"id": "u2", "status": "ONLINE"}));
        let offline = frame("userStatusChange", json!({"id": "u1", "status": "OFFLINE"}));
        assert_eq!(router.process(&online, None).unwrap().len(), 1);
        assert!(router.process(&online, None).unwrap().is_empty());
        assert_eq!(router.process(&other, None).unwrap().len(), 1);
        assert_eq!(router.process(&offline, None).unwrap().len(), 1);
        assert_eq!(router.process(&online, None).unwrap().len(), 1);
    }

    #[test]
    fn text_updates_outside_the_current_workspace_are_dropped() {
        let mut router = router();
        let elsewhere = frame("textUpdated", json!({"graphVertexId": "v1", "workspaceId": "w2"}));
        assert!(router.process(&elsewhere, Some("w1")).unwrap().is_empty());
        let here = frame("textUpdated", json!({"graphVertexId": "v1", "workspaceId": "w1"}));
        assert_eq!(
            router.process(&here, Some("w1")).unwrap(),
            vec![Reaction::rebroadcast("textUpdated", json!({"vertexId": "v1"}))]
        );
    }

    #[test]
    fn product_change_from_ourselves_is_skipped() {
        let mut router = router();
        router.set_source_guid(Some("me".into()));
        let ours = frame("workProductChange", json!({"id": "p1", "skipSourceGuid": "me"}));
        assert!(router.process(&ours, None).unwrap().is_empty());
        let theirs = frame("workProductChange", json!({"id": "p1", "skipSourceGuid": "you"}));
        assert_eq!(router.process(&theirs, None).unwrap().len(), 1);
    }

    #[test]
    fn concept_changes_refetch_the_ontology() {
        let mut router = router();
        let change = frame("ontologyConceptsChange", json!({"conceptIds": ["c1"]}));
        assert_eq!(
            router.process(&change, Some("w1")).unwrap(),
            vec![Reaction::Command(Command::OntologyGet(OntologyRequest {
                workspace_id: Some("w1".into()),
            }))]
        );
    }

    #[test]
    fn messages_without_data_keep_their_fields() {
        let mut router = router();
        let delete = json!({"type": "workspaceDelete", "workspaceId": "w9"}).to_string();
        assert_eq!(
            router.process(&delete, None).unwrap(),
            vec![Reaction::Action(workspace::delete("w9"))]
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(router().process("{not json", None).is_err());
    }
}

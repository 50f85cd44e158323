// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Server-push envelopes: `{type, data?, sourceGuid?}` or a `batch` of them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::WireError;

/// Envelope type that wraps several messages.
pub const BATCH_TYPE: &str = "batch";

/// A single server-push message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SocketEnvelope {
    /// Message type (`propertyChange`, `workspaceChange`, …).
    #[serde(rename = "type")]
    pub kind: String,
    /// Message body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Socket guid of the client whose write caused this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_guid: Option<String>,
    /// Remaining top-level fields, kept for messages that carry no `data`.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl SocketEnvelope {
    /// Build an envelope with a body.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data: Some(data),
            source_guid: None,
            rest: Map::new(),
        }
    }

    /// Set the originating socket guid.
    pub fn with_source_guid(mut self, guid: impl Into<String>) -> Self {
        self.source_guid = Some(guid.into());
        self
    }

    /// True when this message echoes a write made by the client owning `own_guid`.
    pub fn is_echo_of(&self, own_guid: Option<&str>) -> bool {
        match (own_guid, self.source_guid.as_deref()) {
            (Some(own), Some(source)) => own == source,
            _ => false,
        }
    }

    /// Value handed to handlers: `data`, or the whole message when it has none.
    pub fn body(&self) -> Value {
        if let Some(data) = &self.data {
            return data.clone();
        }
        let mut whole = self.rest.clone();
        whole.insert("type".into(), Value::String(self.kind.clone()));
        if let Some(guid) = &self.source_guid {
            whole.insert("sourceGuid".into(), Value::String(guid.clone()));
        }
        Value::Object(whole)
    }
}

/// A decoded socket frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketFrame {
    /// One message.
    Single(SocketEnvelope),
    /// Several messages, in delivery order.
    Batch(Vec<SocketEnvelope>),
}

impl SocketFrame {
    /// Decode a frame from its JSON text.
    ///
    /// Batch items that are not envelopes are skipped with a warning.
    pub fn parse(body: &str) -> Result<Self, WireError> {
        let envelope: SocketEnvelope = serde_json::from_str(body)?;
        if envelope.kind != BATCH_TYPE {
            return Ok(Self::Single(envelope));
        }
        match envelope.data {
            Some(Value::Array(items)) => {
                let messages = items
                    .into_iter()
                    .enumerate()
                    .filter_map(|(index, item)| {
                        serde_json::from_value::<SocketEnvelope>(item)
                            .map_err(|err| {
                                warn!(index, error = %err, "skipping malformed batch item");
                            })
                            .ok()
                    })
                    .collect();
                Ok(Self::Batch(messages))
            }
            _ => Err(WireError::MalformedBatch),
        }
    }

    /// Messages to process, in order, with this client's own echoes removed.
    pub fn into_messages(self, own_guid: Option<&str>) -> Vec<SocketEnvelope> {
        let all = match self {
            Self::Single(envelope) => vec![envelope],
            Self::Batch(messages) => messages,
        };
        all.into_iter()
            .filter(|message| !message.is_echo_of(own_guid))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn batch_filters_own_echoes_and_keeps_order() {
        let body = json!({
            "type": "batch",
            "data": [
                {"type": "propertyChange", "data": {"graphVertexId": "v1"}, "sourceGuid": "me"},
                {"type": "workspaceChange", "data": {"workspaceId": "w1"}, "sourceGuid": "other"},
                {"type": "verticesDeleted", "data": {"vertexIds": ["v2"]}}
            ]
        })
        .to_string();
        let kinds: Vec<String> = SocketFrame::parse(&body)
            .unwrap()
            .into_messages(Some("me"))
            .into_iter()
            .map(|m| m.kind)
            .collect();
        assert_eq!(kinds, vec!["workspaceChange", "verticesDeleted"]);
    }

    #[test]
    fn single_echo_is_dropped() {
        let body = r#"{"type":"propertyChange","data":{},"sourceGuid":"me"}"#;
        assert!(SocketFrame::parse(body)
            .unwrap()
            .into_messages(Some("me"))
            .is_empty());
    }

    #[test]
    fn unknown_guid_never_suppresses() {
        let envelope = SocketEnvelope::new("notification", json!({})).with_source_guid("x");
        assert!(!envelope.is_echo_of(None));
    }

    #[test]
    fn body_falls_back_to_whole_message() {
        let envelope: SocketEnvelope =
            serde_json::from_str(r#"{"type":"sessionExpiration"}"#).unwrap();
        assert_eq!(envelope.body(), json!({"type": "sessionExpiration"}));
    }

    #[test]
    fn body_keeps_top_level_fields_without_data() {
        let envelope: SocketEnvelope = serde_json::from_str(
            r#"{"type":"workspaceChange","workspaceId":"w1","title":"T","sourceGuid":"g"}"#,
        )
        .unwrap();
        assert_eq!(
            envelope.body(),
            json!({"type": "workspaceChange", "workspaceId": "w1", "title": "T", "sourceGuid": "g"})
        );
    }

    #[test]
    fn malformed_batch_items_are_skipped() {
        let body = json!({
            "type": "batch",
            "data": [
                {"type": "propertyChange", "data": {"graphVertexId": "v1"}},
                {"nottype": 1},
                {"type": "verticesDeleted", "data": {"vertexIds": ["v2"]}}
            ]
        })
        .to_string();
        let kinds: Vec<String> = SocketFrame::parse(&body)
            .unwrap()
            .into_messages(None)
            .into_iter()
            .map(|m| m.kind)
            .collect();
        assert_eq!(kinds, vec!["propertyChange", "verticesDeleted"]);
    }

    #[test]
    fn batch_without_array_is_rejected() {
        let err = SocketFrame::parse(r#"{"type":"batch","data":{}}"#).unwrap_err();
        assert!(matches!(err, WireError::MalformedBatch));
    }
}

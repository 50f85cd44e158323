// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request parameters: form fields encoded as a query string, or a multipart
//! upload.

use bytes::Bytes;
use serde_json::{Map, Value};
use url::form_urlencoded::byte_serialize;

/// A file part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Form field name.
    pub field: String,
    /// File name reported to the server.
    pub file_name: String,
    /// MIME type, if known.
    pub content_type: Option<String>,
    /// File contents.
    pub bytes: Bytes,
}

/// Parameters of an Ajax call.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    /// No parameters.
    #[default]
    None,
    /// Named fields; query string for GET/DELETE, urlencoded body for POST.
    Fields(Map<String, Value>),
    /// Multipart upload: plain fields plus file parts.
    Upload {
        /// Plain text fields.
        fields: Map<String, Value>,
        /// File parts.
        files: Vec<FileUpload>,
    },
}

impl Params {
    /// Build field parameters from a JSON object; anything else means none.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Fields(map),
            _ => Self::None,
        }
    }

    /// True when there is nothing to send.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The `workspaceId` field, when the caller supplied one explicitly.
    pub fn has_workspace_id(&self) -> bool {
        match self {
            Self::Fields(fields) | Self::Upload { fields, .. } => fields.contains_key("workspaceId"),
            Self::None => false,
        }
    }

    /// Query string for field parameters (empty for uploads and none).
    pub fn query_string(&self) -> String {
        match self {
            Self::Fields(fields) => to_query_string(fields),
            _ => String::new(),
        }
    }
}

/// Scalar rendering used for both query values and multipart text fields:
/// strings verbatim, objects and arrays as JSON.
pub fn field_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Encode fields as `k=v&…`.
///
/// Array values repeat the key with a `[]` suffix (unless the key already
/// ends in `[]`); object values are sent as JSON text. Keys are written as
/// given, values are percent-encoded.
pub fn to_query_string(fields: &Map<String, Value>) -> String {
    let mut pairs: Vec<String> = Vec::new();
    for (key, value) in fields {
        match value {
            Value::Array(items) => {
                let key = if key.ends_with("[]") {
                    key.clone()
                } else {
                    format!("{key}[]")
                };
                pairs.extend(items.iter().map(|item| pair(&key, item)));
            }
            other => pairs.push(pair(key, other)),
        }
    }
    pairs.join("&")
}

fn pair(key: &str, value: &Value) -> String {
    let encoded: String = byte_serialize(field_text(value).as_bytes()).collect();
    format!("{key}={encoded}")
}

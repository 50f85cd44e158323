// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! JSON-patch (RFC 6902) operations, pointer parsing and the structural diff
//! the worker uses to describe each state transition.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One JSON-patch operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Insert or overwrite a value (arrays: insert before index, `-` appends).
    Add {
        /// Target pointer.
        path: String,
        /// Value to insert.
        value: Value,
    },
    /// Delete the value at `path`.
    Remove {
        /// Target pointer.
        path: String,
    },
    /// Overwrite an existing value.
    Replace {
        /// Target pointer.
        path: String,
        /// New value.
        value: Value,
    },
    /// Remove at `from`, add at `path`.
    Move {
        /// Source pointer.
        from: String,
        /// Target pointer.
        path: String,
    },
    /// Add a copy of the value at `from` to `path`.
    Copy {
        /// Source pointer.
        from: String,
        /// Target pointer.
        path: String,
    },
    /// Fail the whole patch unless `path` equals `value`.
    Test {
        /// Target pointer.
        path: String,
        /// Expected value.
        value: Value,
    },
}

impl PatchOp {
    /// Target pointer of the operation.
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. }
            | Self::Remove { path }
            | Self::Replace { path, .. }
            | Self::Move { path, .. }
            | Self::Copy { path, .. }
            | Self::Test { path, .. } => path,
        }
    }

    /// Operation name as written on the wire.
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::Replace { .. } => "replace",
            Self::Move { .. } => "move",
            Self::Copy { .. } => "copy",
            Self::Test { .. } => "test",
        }
    }
}

/// Failure applying a patch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchError {
    /// Pointer is neither empty nor `/`-prefixed.
    #[error("invalid pointer {0:?}")]
    InvalidPointer(String),
    /// A segment of the pointer does not exist.
    #[error("path not found: {0}")]
    PathNotFound(String),
    /// Array index is not a number or is out of bounds.
    #[error("bad array index in {0}")]
    BadIndex(String),
    /// Tried to step into a scalar.
    #[error("cannot traverse scalar at {0}")]
    NotAContainer(String),
    /// A `test` operation did not match.
    #[error("test failed at {0}")]
    TestFailed(String),
    /// `move` into its own descendant.
    #[error("cannot move {from} into its child {path}")]
    MoveIntoChild {
        /// Source pointer.
        from: String,
        /// Target pointer.
        path: String,
    },
}

/// Escape one pointer token (`~` → `~0`, `/` → `~1`).
pub fn escape_token(token: &str) -> Cow<'_, str> {
    if token.contains(['~', '/']) {
        Cow::Owned(token.replace('~', "~0").replace('/', "~1"))
    } else {
        Cow::Borrowed(token)
    }
}

/// Split a JSON pointer into unescaped tokens. The empty pointer names the root.
pub fn parse_pointer(pointer: &str) -> Result<Vec<String>, PatchError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(PatchError::InvalidPointer(pointer.to_owned()));
    };
    Ok(rest
        .split('/')
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect())
}

/// Join tokens back into a pointer.
pub fn to_pointer<I, S>(tokens: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for token in tokens {
        out.push('/');
        out.push_str(&escape_token(token.as_ref()));
    }
    out
}

/// Compute the operations that turn `before` into `after`.
///
/// Objects are compared key by key; arrays element-wise by index, with
/// trailing growth emitted as `add` and trailing shrinkage as `remove` from
/// the highest index down. Anything else that differs becomes `replace`.
pub fn diff(before: &Value, after: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_at(before, after, "", &mut ops);
    ops
}

fn diff_at(before: &Value, after: &Value, path: &str, ops: &mut Vec<PatchOp>) {
    if before == after {
        return;
    }
    match (before, after) {
        (Value::Object(old), Value::Object(new)) => diff_objects(old, new, path, ops),
        (Value::Array(old), Value::Array(new)) => {
            let shared = old.len().min(new.len());
            for index in 0..shared {
                diff_at(&old[index], &new[index], &format!("{path}/{index}"), ops);
            }
            for index in (new.len()..old.len()).rev() {
                ops.push(PatchOp::Remove {
                    path: format!("{path}/{index}"),
                });
            }
            for (index, value) in new.iter().enumerate().skip(old.len()) {
                ops.push(PatchOp::Add {
                    path: format!("{path}/{index}"),
                    value: value.clone(),
                });
            }
        }
        _ => ops.push(PatchOp::Replace {
            path: path.to_owned(),
            value: after.clone(),
        }),
    }
}

fn diff_objects(old: &Map<String, Value>, new: &Map<String, Value>, path: &str, ops: &mut Vec<PatchOp>) {
    for (key, old_value) in old {
        let child = format!("{path}/{}", escape_token(key));
        match new.get(key) {
            Some(new_value) => diff_at(old_value, new_value, &child, ops),
            None => ops.push(PatchOp::Remove { path: child }),
        }
    }
    for (key, new_value) in new {
        if !old.contains_key(key) {
            ops.push(PatchOp::Add {
                path: format!("{path}/{}", escape_token(key)),
                value: new_value.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_documents_produce_no_ops() {
        let doc = json!({"a": [1, 2, {"b": null}]});
        assert!(diff(&doc, &doc).is_empty());
    }

    #[test]
    fn nested_change_targets_the_leaf() {
        let before = json!({"a": {"b": {"c": 1}, "y": 2}, "x": 3});
        let after = json!({"a": {"b": {"c": 5}, "y": 2}, "x": 3});
        assert_eq!(
            diff(&before, &after),
            vec![PatchOp::Replace {
                path: "/a/b/c".into(),
                value: json!(5)
            }]
        );
    }

    #[test]
    fn keys_with_slashes_are_escaped() {
        let ops = diff(&json!({}), &json!({"a/b~c": 1}));
        assert_eq!(ops[0].path(), "/a~1b~0c");
        assert_eq!(parse_pointer(ops[0].path()).unwrap(), vec!["a/b~c"]);
    }

    #[test]
    fn shrinking_arrays_remove_from_the_end() {
        let ops = diff(&json!([1, 2, 3, 4]), &json!([1, 9]));
        assert_eq!(
            ops,
            vec![
                PatchOp::Replace {
                    path: "/1".into(),
                    value: json!(9)
                },
                PatchOp::Remove { path: "/3".into() },
                PatchOp::Remove { path: "/2".into() },
            ]
        );
    }

    #[test]
    fn removed_keys_and_type_changes() {
        let ops = diff(&json!({"gone": 1, "t": [1]}), &json!({"t": {"k": 1}}));
        assert!(ops.contains(&PatchOp::Remove {
            path: "/gone".into()
        }));
        assert!(ops.contains(&PatchOp::Replace {
            path: "/t".into(),
            value: json!({"k": 1})
        }));
    }

    #[test]
    fn pointer_must_start_with_slash() {
        assert_eq!(
            parse_pointer("a/b"),
            Err(PatchError::InvalidPointer("a/b".into()))
        );
        assert!(parse_pointer("").unwrap().is_empty());
        assert_eq!(to_pointer(["a", "b/c"]), "/a/b~1c");
    }

    #[test]
    fn ops_use_rfc6902_field_names() {
        let op: PatchOp =
            serde_json::from_value(json!({"op": "move", "from": "/a", "path": "/b"})).unwrap();
        assert_eq!(op.op_name(), "move");
        assert_eq!(op.path(), "/b");
    }
}

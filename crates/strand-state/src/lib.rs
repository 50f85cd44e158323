// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persistent JSON state tree for the main-thread mirror.
//!
//! Containers sit behind `Arc`, so cloning a tree is O(1) and applying a patch
//! copies only the containers on the patched paths. Each container is copied
//! at most once per [`StateNode::apply`] call: the first `Arc::make_mut` on a
//! shared node clones it, later visits find the now-unique copy. Siblings off
//! the patched paths remain the very same allocation, which is what memoized
//! selectors compare with [`StateNode::same_node`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::{Number, Value};
use strand_proto::patch::{parse_pointer, PatchError, PatchOp};

/// Ordered object body.
pub type ObjectBody = BTreeMap<String, StateNode>;

/// One node of the persistent tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StateNode {
    /// JSON `null`.
    #[default]
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number.
    Number(Number),
    /// JSON string.
    String(Arc<str>),
    /// JSON array.
    Array(Arc<Vec<StateNode>>),
    /// JSON object.
    Object(Arc<ObjectBody>),
}

impl StateNode {
    /// Empty object.
    pub fn empty_object() -> Self {
        Self::Object(Arc::new(BTreeMap::new()))
    }

    /// True when both handles denote the same allocation (containers) or the
    /// same value (scalars).
    pub fn same_node(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Array(a), Self::Array(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::String(a), Self::String(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => self == other,
        }
    }

    /// Child of an object.
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Element of an array.
    pub fn index(&self, index: usize) -> Option<&Self> {
        match self {
            Self::Array(items) => items.get(index),
            _ => None,
        }
    }

    /// Resolve a JSON pointer.
    pub fn pointer(&self, pointer: &str) -> Option<&Self> {
        let tokens = parse_pointer(pointer).ok()?;
        lookup(self, &tokens)
    }

    /// String contents.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text.as_ref()),
            _ => None,
        }
    }

    /// Boolean contents.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Object body.
    pub fn as_object(&self) -> Option<&ObjectBody> {
        match self {
            Self::Object(map) => Some(map.as_ref()),
            _ => None,
        }
    }

    /// Number of children of a container; zero for scalars.
    pub fn len(&self) -> usize {
        match self {
            Self::Array(items) => items.len(),
            Self::Object(map) => map.len(),
            _ => 0,
        }
    }

    /// True for scalars and empty containers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deep-convert into a `serde_json::Value`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(flag) => Value::Bool(*flag),
            Self::Number(number) => Value::Number(number.clone()),
            Self::String(text) => Value::String(text.to_string()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            Self::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, child)| (key.clone(), child.to_value()))
                    .collect(),
            ),
        }
    }

    /// Apply `ops` in order and return the new root.
    ///
    /// All-or-nothing: on error the caller still holds the untouched original.
    pub fn apply(&self, ops: &[PatchOp]) -> Result<Self, PatchError> {
        let mut next = self.clone();
        for op in ops {
            apply_op(&mut next, op)?;
        }
        Ok(next)
    }
}

impl From<Value> for StateNode {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Bool(flag),
            Value::Number(number) => Self::Number(number),
            Value::String(text) => Self::String(text.into()),
            Value::Array(items) => Self::Array(Arc::new(items.into_iter().map(Self::from).collect())),
            Value::Object(map) => Self::Object(Arc::new(
                map.into_iter()
                    .map(|(key, child)| (key, Self::from(child)))
                    .collect(),
            )),
        }
    }
}

impl Serialize for StateNode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(flag) => serializer.serialize_bool(*flag),
            Self::Number(number) => number.serialize(serializer),
            Self::String(text) => serializer.serialize_str(text),
            Self::Array(items) => serializer.collect_seq(items.iter()),
            Self::Object(map) => serializer.collect_map(map.iter()),
        }
    }
}

fn apply_op(root: &mut StateNode, op: &PatchOp) -> Result<(), PatchError> {
    match op {
        PatchOp::Add { path, value } => add(root, path, StateNode::from(value.clone())),
        PatchOp::Remove { path } => remove(root, path).map(drop),
        PatchOp::Replace { path, value } => {
            let tokens = parse_pointer(path)?;
            let target = resolve_mut(root, &tokens, path)?;
            *target = StateNode::from(value.clone());
            Ok(())
        }
        PatchOp::Move { from, path } => {
            if from == path {
                return Ok(());
            }
            if path.starts_with(&format!("{from}/")) {
                return Err(PatchError::MoveIntoChild {
                    from: from.clone(),
                    path: path.clone(),
                });
            }
            let moved = remove(root, from)?;
            add(root, path, moved)
        }
        PatchOp::Copy { from, path } => {
            let tokens = parse_pointer(from)?;
            let copied = lookup(root, &tokens)
                .cloned()
                .ok_or_else(|| PatchError::PathNotFound(from.clone()))?;
            add(root, path, copied)
        }
        PatchOp::Test { path, value } => {
            let tokens = parse_pointer(path)?;
            match lookup(root, &tokens) {
                Some(found) if found.to_value() == *value => Ok(()),
                _ => Err(PatchError::TestFailed(path.clone())),
            }
        }
    }
}

fn add(root: &mut StateNode, path: &str, value: StateNode) -> Result<(), PatchError> {
    let tokens = parse_pointer(path)?;
    let Some((last, parents)) = tokens.split_last() else {
        *root = value;
        return Ok(());
    };
    match resolve_mut(root, parents, path)? {
        StateNode::Object(map) => {
            Arc::make_mut(map).insert(last.clone(), value);
            Ok(())
        }
        StateNode::Array(items) => {
            let items = Arc::make_mut(items);
            let index = if last == "-" {
                items.len()
            } else {
                parse_index(last, path)?
            };
            if index > items.len() {
                return Err(PatchError::BadIndex(path.to_owned()));
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err(PatchError::NotAContainer(path.to_owned())),
    }
}

fn remove(root: &mut StateNode, path: &str) -> Result<StateNode, PatchError> {
    let tokens = parse_pointer(path)?;
    let Some((last, parents)) = tokens.split_last() else {
        return Ok(std::mem::take(root));
    };
    match resolve_mut(root, parents, path)? {
        StateNode::Object(map) => Arc::make_mut(map)
            .remove(last)
            .ok_or_else(|| PatchError::PathNotFound(path.to_owned())),
        StateNode::Array(items) => {
            let index = parse_index(last, path)?;
            if index >= items.len() {
                return Err(PatchError::BadIndex(path.to_owned()));
            }
            Ok(Arc::make_mut(items).remove(index))
        }
        _ => Err(PatchError::NotAContainer(path.to_owned())),
    }
}

fn resolve_mut<'a>(
    mut node: &'a mut StateNode,
    tokens: &[String],
    path: &str,
) -> Result<&'a mut StateNode, PatchError> {
    for token in tokens {
        node = match node {
            StateNode::Object(map) => Arc::make_mut(map)
                .get_mut(token)
                .ok_or_else(|| PatchError::PathNotFound(path.to_owned()))?,
            StateNode::Array(items) => {
                let index = parse_index(token, path)?;
                Arc::make_mut(items)
                    .get_mut(index)
                    .ok_or_else(|| PatchError::BadIndex(path.to_owned()))?
            }
            _ => return Err(PatchError::NotAContainer(path.to_owned())),
        };
    }
    Ok(node)
}

fn lookup<'a>(mut node: &'a StateNode, tokens: &[String]) -> Option<&'a StateNode> {
    for token in tokens {
        node = match node {
            StateNode::Object(map) => map.get(token)?,
            StateNode::Array(items) => items.get(token.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

fn parse_index(token: &str, path: &str) -> Result<usize, PatchError> {
    let well_formed = !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_digit())
        && (token == "0" || !token.starts_with('0'));
    if !well_formed {
        return Err(PatchError::BadIndex(path.to_owned()));
    }
    token
        .parse()
        .map_err(|_| PatchError::BadIndex(path.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(value: Value) -> StateNode {
        StateNode::from(value)
    }

    #[test]
    fn add_replace_remove_on_objects_and_arrays() {
        let root = tree(json!({"list": [1, 3], "obj": {"a": 1}}));
        let next = root
            .apply(&[
                PatchOp::Add {
                    path: "/list/1".into(),
                    value: json!(2),
                },
                PatchOp::Add {
                    path: "/list/-".into(),
                    value: json!(4),
                },
                PatchOp::Replace {
                    path: "/obj/a".into(),
                    value: json!("x"),
                },
                PatchOp::Remove {
                    path: "/list/0".into(),
                },
            ])
            .unwrap();
        assert_eq!(next.to_value(), json!({"list": [2, 3, 4], "obj": {"a": "x"}}));
        assert_eq!(root.to_value(), json!({"list": [1, 3], "obj": {"a": 1}}));
    }

    #[test]
    fn move_and_copy() {
        let root = tree(json!({"a": {"v": 1}, "b": {}}));
        let next = root
            .apply(&[
                PatchOp::Copy {
                    from: "/a/v".into(),
                    path: "/b/copy".into(),
                },
                PatchOp::Move {
                    from: "/a".into(),
                    path: "/c".into(),
                },
            ])
            .unwrap();
        assert_eq!(next.to_value(), json!({"b": {"copy": 1}, "c": {"v": 1}}));
    }

    #[test]
    fn failed_test_leaves_original_intact() {
        let root = tree(json!({"a": 1}));
        let err = root
            .apply(&[
                PatchOp::Replace {
                    path: "/a".into(),
                    value: json!(2),
                },
                PatchOp::Test {
                    path: "/a".into(),
                    value: json!(1),
                },
            ])
            .unwrap_err();
        assert_eq!(err, PatchError::TestFailed("/a".into()));
        assert_eq!(root.to_value(), json!({"a": 1}));
    }

    #[test]
    fn errors_for_missing_paths_and_bad_indices() {
        let root = tree(json!({"a": [1]}));
        assert!(matches!(
            root.apply(&[PatchOp::Remove { path: "/b".into() }]),
            Err(PatchError::PathNotFound(_))
        ));
        assert!(matches!(
            root.apply(&[PatchOp::Add {
                path: "/a/01".into(),
                value: json!(0)
            }]),
            Err(PatchError::BadIndex(_))
        ));
        assert!(matches!(
            root.apply(&[PatchOp::Move {
                from: "/a".into(),
                path: "/a/0".into()
            }]),
            Err(PatchError::MoveIntoChild { .. })
        ));
    }

    #[test]
    fn replacing_the_root() {
        let root = tree(json!({"a": 1}));
        let next = root
            .apply(&[PatchOp::Replace {
                path: String::new(),
                value: json!([true]),
            }])
            .unwrap();
        assert_eq!(next.to_value(), json!([true]));
    }

    #[test]
    fn serializes_like_the_source_value() {
        let value = json!({"n": 1.5, "s": "x", "l": [null, false]});
        let encoded = serde_json::to_value(tree(value.clone())).unwrap();
        assert_eq!(encoded, value);
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Undo/redo history, scoped per workspace.
//!
//! Any action whose payload carries both `undo` and `redo` is recorded on the
//! stack named by `undoScope` (or `global`), clearing that scope's redo
//! stack. `UNDO`/`REDO` move the top entry between stacks; the matching
//! inverse actions are resolved in [`crate::Store::dispatch`] from the undo
//! pairs of registered store extensions.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};
use strand_proto::Action;

/// Undo the most recent entry of a scope.
pub const UNDO: &str = "UNDO";
/// Redo the most recently undone entry of a scope.
pub const REDO: &str = "REDO";
/// Scope used when an action names none.
pub const GLOBAL_SCOPE: &str = "global";

/// One recorded edit.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UndoEntry {
    /// Action type of the original edit.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload handed to the undo half of the pair.
    pub undo: Value,
    /// Payload handed to the redo half of the pair.
    pub redo: Value,
}

/// Stacks of one scope.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct UndoStacks {
    /// Most recent last.
    pub undos: Vec<UndoEntry>,
    /// Most recently undone last.
    pub redos: Vec<UndoEntry>,
}

/// All scopes.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(transparent)]
pub struct UndoHistory(pub BTreeMap<String, UndoStacks>);

impl Default for UndoHistory {
    fn default() -> Self {
        Self(BTreeMap::from([(GLOBAL_SCOPE.to_owned(), UndoStacks::default())]))
    }
}

/// Which way a history move goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `UNDO`.
    Undo,
    /// `REDO`.
    Redo,
}

impl Direction {
    /// Direction named by an action type.
    pub fn of(action: &Action) -> Option<Self> {
        match action.kind.as_str() {
            UNDO => Some(Self::Undo),
            REDO => Some(Self::Redo),
            _ => None,
        }
    }
}

/// Scope an action applies to.
pub fn scope_of(action: &Action) -> String {
    action
        .payload_str("undoScope")
        .unwrap_or(GLOBAL_SCOPE)
        .to_owned()
}

impl UndoHistory {
    /// Stacks of `scope`, if it has ever recorded anything.
    pub fn scope(&self, scope: &str) -> Option<&UndoStacks> {
        self.0.get(scope)
    }

    /// Entry the next `direction` move would take.
    pub fn peek(&self, scope: &str, direction: Direction) -> Option<&UndoEntry> {
        let stacks = self.0.get(scope)?;
        match direction {
            Direction::Undo => stacks.undos.last(),
            Direction::Redo => stacks.redos.last(),
        }
    }

    pub(crate) fn reduce(&mut self, action: &Action, limit: Option<usize>) {
        if let Some(direction) = Direction::of(action) {
            self.step(&scope_of(action), direction);
            return;
        }
        let (Some(undo), Some(redo)) = (action.payload.get("undo"), action.payload.get("redo"))
        else {
            return;
        };
        let stacks = self.0.entry(scope_of(action)).or_default();
        stacks.undos.push(UndoEntry {
            kind: action.kind.clone(),
            undo: undo.clone(),
            redo: redo.clone(),
        });
        stacks.redos.clear();
        if let Some(limit) = limit {
            let excess = stacks.undos.len().saturating_sub(limit);
            stacks.undos.drain(..excess);
        }
    }

    fn step(&mut self, scope: &str, direction: Direction) {
        let Some(stacks) = self.0.get_mut(scope) else {
            return;
        };
        let (from, to) = match direction {
            Direction::Undo => (&mut stacks.undos, &mut stacks.redos),
            Direction::Redo => (&mut stacks.redos, &mut stacks.undos),
        };
        if let Some(entry) = from.pop() {
            to.push(entry);
        }
    }
}

/// Fill in `undoScope` on an `UNDO`/`REDO` that names none.
pub(crate) fn with_default_scope(mut action: Action, scope: &str) -> Action {
    if action.payload_str("undoScope").is_some() {
        return action;
    }
    if !action.payload.is_object() {
        action.payload = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(payload) = &mut action.payload {
        payload.insert("undoScope".to_owned(), Value::String(scope.to_owned()));
    }
    action
}

/// `UNDO` for `scope`.
///
/// `None` targets the current workspace when the store has one, else global.
pub fn undo(scope: Option<&str>) -> Action {
    history_action(UNDO, scope)
}

/// `REDO` for `scope`; `None` resolves like [`undo`].
pub fn redo(scope: Option<&str>) -> Action {
    history_action(REDO, scope)
}

fn history_action(kind: &str, scope: Option<&str>) -> Action {
    match scope {
        Some(scope) => Action::new(kind, json!({ "undoScope": scope })),
        None => Action::bare(kind),
    }
}

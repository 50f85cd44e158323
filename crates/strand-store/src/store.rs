// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The canonical store and its extension seam.
//!
//! Every dispatch runs the core reducers, then extension reducers, then diffs
//! the JSON form of the state against the previous one. A non-empty diff is
//! sent to the main thread as a worker-tagged `STATE_APPLY_DIFF` while the
//! state lock is still held, so diffs leave in the order they were computed.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use strand_proto::{diff, Action, WorkerMessage};
use strand_registry::{DocOptions, ExtensionPoint, ExtensionRegistry};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::state::RootState;
use crate::undo::{scope_of, with_default_scope, Direction};
use crate::StoreError;

/// Extension reducer; runs after the core reducers on every action.
pub type Reducer = Arc<dyn Fn(&mut RootState, &Action) + Send + Sync>;
/// Maps a recorded undo or redo payload to the actions that apply it.
pub type UndoFn = Arc<dyn Fn(&Value) -> Vec<Action> + Send + Sync>;

/// Inverse handlers for one action type.
#[derive(Clone)]
pub struct UndoPair {
    /// Applies the `undo` payload.
    pub undo: UndoFn,
    /// Applies the `redo` payload.
    pub redo: UndoFn,
}

impl fmt::Debug for UndoPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoPair").finish_non_exhaustive()
    }
}

/// A store plugin: an optional reducer plus undo pairs by action type.
pub struct StoreExtension {
    /// Slice the plugin works on (informational).
    pub key: String,
    /// Reducer run after the core reducers.
    pub reducer: Option<Reducer>,
    /// Undo pairs keyed by the recorded action type.
    pub undo_actions: HashMap<String, UndoPair>,
}

impl fmt::Debug for StoreExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreExtension")
            .field("key", &self.key)
            .field("reducer", &self.reducer.is_some())
            .field("undo_actions", &self.undo_actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Extension point for [`StoreExtension`]s.
pub const STORE_POINT: ExtensionPoint<StoreExtension> = ExtensionPoint::new("strand.store");

struct Current {
    state: Arc<RootState>,
    json: Value,
}

struct StoreInner {
    current: Mutex<Current>,
    watch: watch::Sender<Arc<RootState>>,
    registry: Arc<ExtensionRegistry>,
    outbound: Option<mpsc::UnboundedSender<WorkerMessage>>,
    undo_limit: Option<usize>,
}

/// Cloneable handle to the worker store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("undo_limit", &self.inner.undo_limit)
            .field("mirrored", &self.inner.outbound.is_some())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Store with default state.
    ///
    /// Diffs go to `outbound` when given; `undo_limit` caps each undo stack.
    pub fn new(
        registry: Arc<ExtensionRegistry>,
        outbound: Option<mpsc::UnboundedSender<WorkerMessage>>,
        undo_limit: Option<usize>,
    ) -> Result<Self, StoreError> {
        registry.document(
            &STORE_POINT,
            "Add reducers and undo/redo pairs to the worker store",
            |extension: &StoreExtension| {
                extension.reducer.is_some() || !extension.undo_actions.is_empty()
            },
            DocOptions::default(),
        )?;
        let state = Arc::new(RootState::default());
        let json = serde_json::to_value(&*state)?;
        let (watch, _) = watch::channel(Arc::clone(&state));
        Ok(Self {
            inner: Arc::new(StoreInner {
                current: Mutex::new(Current { state, json }),
                watch,
                registry,
                outbound,
                undo_limit,
            }),
        })
    }

    /// Registry the store reads extensions from.
    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.inner.registry
    }

    /// Current state.
    pub fn state(&self) -> Arc<RootState> {
        Arc::clone(&self.lock().state)
    }

    /// JSON form of the current state, as the mirror sees it.
    pub fn snapshot(&self) -> Value {
        self.lock().json.clone()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RootState>> {
        self.inner.watch.subscribe()
    }

    /// Current workspace id, waiting until one is set.
    pub async fn current_workspace(&self) -> Result<String, StoreError> {
        let mut changes = self.subscribe();
        let state = changes
            .wait_for(|state| state.current_workspace().is_some())
            .await
            .map_err(|_| StoreError::Disconnected)?;
        state
            .current_workspace()
            .map(str::to_owned)
            .ok_or(StoreError::NoWorkspace)
    }

    /// Reduce `action`, mirror the resulting diff, then dispatch any inverse
    /// actions an `UNDO`/`REDO` resolved to.
    ///
    /// An `UNDO`/`REDO` without `undoScope` applies to the current workspace.
    pub fn dispatch(&self, action: Action) -> Result<(), StoreError> {
        let state = self.state();
        let action = match (Direction::of(&action), state.current_workspace()) {
            (Some(_), Some(workspace_id)) => with_default_scope(action, workspace_id),
            _ => action,
        };
        drop(state);
        let extensions = self.inner.registry.extensions_for(&STORE_POINT);
        let inverse = Direction::of(&action)
            .map(|direction| self.inverse_actions(&extensions, &action, direction))
            .unwrap_or_default();
        self.reduce(&extensions, &action)?;
        for next in inverse {
            self.dispatch(next)?;
        }
        Ok(())
    }

    fn inverse_actions(
        &self,
        extensions: &[Arc<StoreExtension>],
        action: &Action,
        direction: Direction,
    ) -> Vec<Action> {
        let state = self.state();
        let scope = scope_of(action);
        let Some(entry) = state.undo_action_history.peek(&scope, direction) else {
            debug!(scope = %scope, ?direction, "nothing to move");
            return Vec::new();
        };
        let Some(pair) = extensions
            .iter()
            .find_map(|extension| extension.undo_actions.get(&entry.kind))
        else {
            debug!(action = %entry.kind, "no undo pair registered");
            return Vec::new();
        };
        match direction {
            Direction::Undo => (pair.undo)(&entry.undo),
            Direction::Redo => (pair.redo)(&entry.redo),
        }
    }

    fn reduce(&self, extensions: &[Arc<StoreExtension>], action: &Action) -> Result<(), StoreError> {
        let mut current = self.lock();
        let state = Arc::make_mut(&mut current.state);
        state.reduce(action, self.inner.undo_limit);
        for extension in extensions {
            if let Some(reducer) = &extension.reducer {
                reducer(state, action);
            }
        }
        let json = serde_json::to_value(&*current.state)?;
        let ops = diff(&current.json, &json);
        current.json = json;
        if ops.is_empty() {
            return Ok(());
        }
        trace!(action = %action.kind, ops = ops.len(), "state changed");
        self.inner.watch.send_replace(Arc::clone(&current.state));
        if let Some(outbound) = &self.inner.outbound {
            outbound
                .send(WorkerMessage::StoreAction {
                    action: Action::apply_diff(&ops)?,
                })
                .map_err(|_| StoreError::Disconnected)?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Current> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

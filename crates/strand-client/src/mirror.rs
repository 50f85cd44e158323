// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Read-only mirror of the worker's state.
//!
//! UI code dispatches on the mirror as if it were the store, but untagged
//! actions only travel to the worker. The worker's answer comes back as a
//! tagged `STATE_APPLY_DIFF`, and that is the only thing that changes the
//! mirror. Each applied diff produces a new [`StateNode`] sharing every
//! untouched branch with the previous one.

use std::sync::Arc;

use serde_json::Value;
use strand_proto::{Action, MainMessage, STATE_APPLY_DIFF};
use strand_state::StateNode;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::RequestError;

/// Main-thread copy of the canonical state.
#[derive(Debug, Clone)]
pub struct MirrorStore {
    state: Arc<watch::Sender<StateNode>>,
    to_worker: mpsc::UnboundedSender<MainMessage>,
}

impl MirrorStore {
    /// Mirror seeded with the worker's `StoreInit` snapshot.
    pub fn new(initial: Value, to_worker: mpsc::UnboundedSender<MainMessage>) -> Self {
        let (state, _) = watch::channel(StateNode::from(initial));
        Self {
            state: Arc::new(state),
            to_worker,
        }
    }

    /// Current state. Cloning a tree is cheap.
    pub fn state(&self) -> StateNode {
        self.state.borrow().clone()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<StateNode> {
        self.state.subscribe()
    }

    /// Dispatch `action`.
    ///
    /// Worker-tagged diffs are applied; everything else is relayed to the
    /// worker unchanged and leaves the mirror as it is.
    pub fn dispatch(&self, action: Action) -> Result<(), RequestError> {
        if action.is_from_worker() {
            self.apply(&action);
            return Ok(());
        }
        debug!(action = %action.kind, "relaying action to worker");
        self.to_worker
            .send(MainMessage::StoreAction { action })
            .map_err(|_| RequestError::Disconnected)
    }

    /// Replace the whole tree, as after a second `StoreInit`.
    pub fn reset(&self, state: Value) {
        self.state.send_replace(StateNode::from(state));
    }

    fn apply(&self, action: &Action) {
        if action.kind != STATE_APPLY_DIFF {
            debug!(action = %action.kind, "worker action without a diff ignored");
            return;
        }
        let ops = match action.diff_ops() {
            Ok(ops) => ops,
            Err(err) => {
                warn!(error = %err, "undecodable state diff");
                return;
            }
        };
        let next = self.state.borrow().apply(&ops);
        match next {
            Ok(next) => {
                self.state.send_replace(next);
            }
            Err(err) => warn!(error = %err, ops = ops.len(), "state diff did not apply"),
        }
    }
}

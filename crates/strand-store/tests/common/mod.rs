// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use strand_dry_tests::FakeTransport;
use strand_proto::{Action, WorkerMessage};
use strand_registry::ExtensionRegistry;
use strand_store::{workspace, RootState, Store, StoreExtension, STORE_POINT};
use tokio::sync::mpsc;

/// Store wired to a fake backend, with the outbound channel kept for
/// inspection.
pub struct Harness {
    pub store: Store,
    pub transport: FakeTransport,
    pub outbound: mpsc::UnboundedReceiver<WorkerMessage>,
    pub seen: Arc<Mutex<Vec<Action>>>,
}

/// Harness with the graph plugin installed, a recording reducer, and `w1`
/// as the current workspace.
pub fn harness() -> Harness {
    let registry = Arc::new(ExtensionRegistry::new());
    strand_store::graph::register(&registry).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    registry
        .register(
            &STORE_POINT,
            StoreExtension {
                key: "recorder".to_owned(),
                reducer: Some(Arc::new(move |_state: &mut RootState, action: &Action| {
                    log.lock().unwrap().push(action.clone());
                })),
                undo_actions: Default::default(),
            },
        )
        .unwrap();
    let (tx, outbound) = mpsc::unbounded_channel();
    let store = Store::new(registry, Some(tx), None).unwrap();
    store.dispatch(workspace::set_current(Some("w1"))).unwrap();
    Harness {
        store,
        transport: FakeTransport::new(),
        outbound,
        seen,
    }
}

impl Harness {
    /// Actions of `kind` the store reduced, in order.
    pub fn seen(&self, kind: &str) -> Vec<Action> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|action| action.kind == kind)
            .cloned()
            .collect()
    }

    /// Drain the outbound channel.
    pub fn drain(&mut self) -> Vec<WorkerMessage> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

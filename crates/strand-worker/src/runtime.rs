// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The worker loop.
//!
//! One task owns the inbound channel and handles messages in arrival order.
//! Reducer actions are applied inline; service calls and store commands run
//! on their own tasks so a slow backend never stalls the loop.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use strand_proto::{
    Action, DataRequest, DataResponse, MainMessage, RequestId, SessionContext, WorkerMessage,
};
use strand_registry::ExtensionRegistry;
use strand_store::command::is_command_type;
use strand_store::{graph, workspace, Command, DebounceConfig, Effects, Store, StoreError};
use strand_transport::Transport;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::service::{CallContext, ServiceRegistry};
use crate::socket::{Reaction, SocketRouter};
use crate::ServiceError;

/// Start-up knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Cap on each undo stack; `None` keeps everything.
    pub undo_limit: Option<usize>,
    /// Focus debounce.
    pub focus: DebounceConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            undo_limit: None,
            focus: DebounceConfig::new(Duration::from_millis(250), "focus"),
        }
    }
}

/// Main-thread ends of a running worker.
#[derive(Debug)]
pub struct WorkerChannels {
    /// Messages into the worker.
    pub to_worker: mpsc::UnboundedSender<MainMessage>,
    /// Messages out of the worker; the first is always `StoreInit`.
    pub from_worker: mpsc::UnboundedReceiver<WorkerMessage>,
    /// The loop; it ends once every `to_worker` sender is dropped.
    pub task: JoinHandle<()>,
}

/// Start a worker on the current tokio runtime.
///
/// Registers the graph product plugin on `registry`, builds the store and
/// queues `StoreInit` with its initial snapshot.
pub fn spawn(
    transport: Arc<dyn Transport>,
    registry: Arc<ExtensionRegistry>,
    config: WorkerConfig,
) -> Result<WorkerChannels, ServiceError> {
    graph::register(&registry)?;
    let (outbound, from_worker) = mpsc::unbounded_channel();
    let store = Store::new(Arc::clone(&registry), Some(outbound.clone()), config.undo_limit)?;
    let services = ServiceRegistry::new(Arc::clone(&registry))?;
    let router = SocketRouter::new(registry)?;
    outbound
        .send(WorkerMessage::StoreInit {
            state: store.snapshot(),
        })
        .map_err(|_| StoreError::Disconnected)?;

    let worker = Worker {
        effects: Effects::new(store, transport, config.focus),
        services: Arc::new(services),
        router,
        outbound,
        pending: Arc::default(),
    };
    let (to_worker, inbound) = mpsc::unbounded_channel();
    let task = tokio::spawn(worker.run(inbound));
    Ok(WorkerChannels {
        to_worker,
        from_worker,
        task,
    })
}

type Pending = Arc<Mutex<HashSet<RequestId>>>;

struct Worker {
    effects: Effects,
    services: Arc<ServiceRegistry>,
    router: SocketRouter,
    outbound: mpsc::UnboundedSender<WorkerMessage>,
    pending: Pending,
}

fn send(outbound: &mpsc::UnboundedSender<WorkerMessage>, message: WorkerMessage) {
    if outbound.send(message).is_err() {
        debug!("main thread gone; dropping worker message");
    }
}

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, HashSet<RequestId>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Worker {
    async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<MainMessage>) {
        while let Some(message) = inbound.recv().await {
            self.handle(message);
        }
        info!("worker channel closed; stopping");
    }

    fn handle(&mut self, message: MainMessage) {
        match message {
            MainMessage::DataRequest(request) => self.data_request(request),
            MainMessage::DataRequestCancel { request_id } => {
                if lock(&self.pending).remove(&request_id) {
                    debug!(request_id, "data request cancelled");
                }
            }
            MainMessage::StoreAction { action } => {
                if action.is_from_worker() {
                    debug!(action = %action.kind, "ignoring worker-authored action");
                } else if is_command_type(&action.kind) {
                    let effects = self.effects.clone();
                    tokio::spawn(async move {
                        let kind = action.kind.clone();
                        if let Err(err) = effects.handle(action).await {
                            warn!(action = %kind, error = %err, "command failed");
                        }
                    });
                } else {
                    self.dispatch(action);
                }
            }
            MainMessage::SocketMessage { body } => {
                let state = self.effects.store().state();
                let current = state.current_workspace().map(str::to_owned);
                drop(state);
                match self.router.process(&body, current.as_deref()) {
                    Ok(reactions) => {
                        for reaction in reactions {
                            self.react(reaction);
                        }
                    }
                    Err(err) => warn!(error = %err, "malformed socket frame"),
                }
            }
            MainMessage::UpdateContext(context) => self.update_context(context),
        }
    }

    fn dispatch(&self, action: Action) {
        let kind = action.kind.clone();
        if let Err(err) = self.effects.store().dispatch(action) {
            warn!(action = %kind, error = %err, "dispatch failed");
        }
    }

    fn react(&self, reaction: Reaction) {
        match reaction {
            Reaction::Command(command) => self.run_command(command),
            Reaction::Action(action) => self.dispatch(action),
            Reaction::Rebroadcast { event_name, data } => {
                send(&self.outbound, WorkerMessage::Rebroadcast { event_name, data });
            }
        }
    }

    fn run_command(&self, command: Command) {
        let effects = self.effects.clone();
        tokio::spawn(async move {
            if let Err(err) = effects.run(command).await {
                warn!(error = %err, "socket command failed");
            }
        });
    }

    fn update_context(&mut self, context: SessionContext) {
        self.router.set_source_guid(context.socket_source_guid.clone());
        let workspace_id = context.current_workspace_id.clone();
        self.effects.transport().update_context(context);
        let changed = self.effects.store().state().current_workspace() != workspace_id.as_deref();
        if changed {
            if let Some(id) = &workspace_id {
                debug!(workspace_id = %id, "current workspace changed");
            }
            self.dispatch(workspace::set_current(workspace_id.as_deref()));
        }
    }

    fn data_request(&self, request: DataRequest) {
        let DataRequest {
            request_id,
            service,
            method,
            args,
        } = request;
        debug!(request_id, service = %service, method = %method, "data request");
        send(&self.outbound, WorkerMessage::DataRequestStarted { request_id });
        lock(&self.pending).insert(request_id);

        let services = Arc::clone(&self.services);
        let pending = Arc::clone(&self.pending);
        let outbound = self.outbound.clone();
        let store = self.effects.store().clone();
        let transport = Arc::clone(self.effects.transport());
        tokio::spawn(async move {
            let (progress, mut progress_rx) = mpsc::unbounded_channel();
            let context = CallContext {
                transport,
                store,
                progress: Some(progress),
            };
            let call = services.call(&context, &service, &method, args);
            tokio::pin!(call);
            let result = loop {
                tokio::select! {
                    result = &mut call => break result,
                    Some(progress) = progress_rx.recv() => send(
                        &outbound,
                        WorkerMessage::DataRequestProgress { request_id, progress },
                    ),
                }
            };
            let response = match result {
                Ok(value) => DataResponse::ok(request_id, value),
                Err(err) => {
                    warn!(request_id, service = %service, method = %method, error = %err, "data request failed");
                    DataResponse::err(request_id, err.to_wire())
                }
            };
            if lock(&pending).remove(&request_id) {
                send(&outbound, WorkerMessage::DataRequestCompleted(response));
            } else {
                debug!(request_id, "data request no longer pending; dropping completion");
            }
        });
    }
}

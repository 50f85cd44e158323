// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Connected main-thread runtime.

use std::time::Duration;

use serde_json::{json, Value};
use strand_app_core::prefs::{ClientConfig, ClientPrefs, LocalePrefs};
use strand_proto::{Action, MainMessage, SessionContext, WorkerMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{ChannelEvents, UiEvent};
use crate::mirror::MirrorStore;
use crate::router::{PendingRequest, RequestRouter};
use crate::RequestError;

/// How a [`Client`] behaves.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Unacknowledged requests fail after this long.
    pub request_timeout: Duration,
    /// Display pixel ratio reported at start-up.
    pub pixel_ratio: f64,
    /// Locale for configuration messages.
    pub locale: LocalePrefs,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_settings(&ClientConfig::default(), &ClientPrefs::default())
    }
}

impl ClientOptions {
    /// Options from persisted settings.
    pub fn from_settings(config: &ClientConfig, prefs: &ClientPrefs) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            pixel_ratio: 1.0,
            locale: prefs.locale.clone(),
        }
    }
}

/// Request router and mirror bound to a running worker.
#[derive(Debug)]
pub struct Client {
    router: RequestRouter,
    mirror: MirrorStore,
    to_worker: mpsc::UnboundedSender<MainMessage>,
    events: ChannelEvents,
    pump: JoinHandle<()>,
}

impl Client {
    /// Wait for the worker's `StoreInit`, seed the mirror, start routing
    /// worker messages and send the bootstrap actions.
    pub async fn connect(
        to_worker: mpsc::UnboundedSender<MainMessage>,
        mut from_worker: mpsc::UnboundedReceiver<WorkerMessage>,
        options: ClientOptions,
    ) -> Result<Self, RequestError> {
        let initial = loop {
            match from_worker.recv().await {
                Some(WorkerMessage::StoreInit { state }) => break state,
                Some(other) => debug!(?other, "worker message before StoreInit dropped"),
                None => return Err(RequestError::Disconnected),
            }
        };
        let mirror = MirrorStore::new(initial, to_worker.clone());
        let router = RequestRouter::new(to_worker.clone(), options.request_timeout);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut events = ChannelEvents::new();
        events.set_channel(events_rx);
        let pump = tokio::spawn(pump(from_worker, router.clone(), mirror.clone(), events_tx));

        let client = Self {
            router,
            mirror,
            to_worker,
            events,
            pump,
        };
        client.bootstrap(&options)?;
        Ok(client)
    }

    fn bootstrap(&self, options: &ClientOptions) -> Result<(), RequestError> {
        self.mirror.dispatch(Action::new("ontology.get", json!({})))?;
        self.mirror.dispatch(Action::new(
            "SCREEN_PIXEL_RATIO",
            json!({ "pixelRatio": options.pixel_ratio }),
        ))?;
        self.mirror.dispatch(Action::new(
            "configuration.get",
            json!({ "locale": options.locale }),
        ))
    }

    /// Issue `service.method(args…)`.
    pub fn request(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<PendingRequest, RequestError> {
        self.router.request(service, method, args)
    }

    /// Dispatch on the mirror (relayed to the worker).
    pub fn dispatch(&self, action: Action) -> Result<(), RequestError> {
        self.mirror.dispatch(action)
    }

    /// Push new session values to the worker.
    pub fn update_context(&self, context: SessionContext) -> Result<(), RequestError> {
        self.send(MainMessage::UpdateContext(context))
    }

    /// Hand a raw socket frame to the worker.
    pub fn socket_message(&self, body: impl Into<String>) -> Result<(), RequestError> {
        self.send(MainMessage::SocketMessage { body: body.into() })
    }

    fn send(&self, message: MainMessage) -> Result<(), RequestError> {
        self.to_worker
            .send(message)
            .map_err(|_| RequestError::Disconnected)
    }

    /// The router.
    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    /// The mirror.
    pub fn mirror(&self) -> &MirrorStore {
        &self.mirror
    }

    /// Take the port rebroadcast events arrive on; later calls get an
    /// empty port.
    pub fn take_events(&mut self) -> ChannelEvents {
        std::mem::take(&mut self.events)
    }

    /// False once the worker side has closed.
    pub fn is_connected(&self) -> bool {
        !self.pump.is_finished()
    }
}

async fn pump(
    mut from_worker: mpsc::UnboundedReceiver<WorkerMessage>,
    router: RequestRouter,
    mirror: MirrorStore,
    events: mpsc::UnboundedSender<UiEvent>,
) {
    while let Some(message) = from_worker.recv().await {
        if router.handle(&message) {
            continue;
        }
        match message {
            WorkerMessage::StoreAction { action } => {
                if !action.is_from_worker() {
                    warn!(action = %action.kind, "untagged action from worker ignored");
                } else if let Err(err) = mirror.dispatch(action) {
                    warn!(error = %err, "mirror dispatch failed");
                }
            }
            WorkerMessage::Rebroadcast { event_name, data } => {
                let event = UiEvent {
                    name: event_name,
                    data,
                };
                if events.send(event).is_err() {
                    debug!("no event listener; rebroadcast dropped");
                }
            }
            WorkerMessage::StoreInit { state } => {
                debug!("worker re-initialized; resetting mirror");
                mirror.reset(state);
            }
            other => debug!(?other, "unrouted worker message"),
        }
    }
    router.disconnect();
    info!("worker channel closed; client pump stopped");
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Runs [`Command`]s against the store and a transport.

use std::fmt;
use std::sync::Arc;

use strand_proto::Action;
use strand_transport::Transport;
use tracing::warn;

use crate::command::Command;
use crate::debounce::{DebounceConfig, Debouncer};
use crate::{configuration, element, graph, ontology, product, Store, StoreError};

/// Store plus the transport its commands talk to.
#[derive(Clone)]
pub struct Effects {
    store: Store,
    transport: Arc<dyn Transport>,
    focus: Debouncer,
}

impl fmt::Debug for Effects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effects")
            .field("store", &self.store)
            .field("focus", self.focus.config())
            .finish_non_exhaustive()
    }
}

impl Effects {
    /// Bind `store` to `transport`; focus changes are debounced per `focus`.
    pub fn new(store: Store, transport: Arc<dyn Transport>, focus: DebounceConfig) -> Self {
        Self {
            store,
            transport,
            focus: Debouncer::new(focus),
        }
    }

    /// The store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run `action` as a command when it is one, otherwise reduce it.
    pub async fn handle(&self, action: Action) -> Result<(), StoreError> {
        match Command::from_action(&action) {
            Some(command) => self.run(command?).await,
            None => self.store.dispatch(action),
        }
    }

    /// Run one command to completion.
    pub async fn run(&self, command: Command) -> Result<(), StoreError> {
        let store = &self.store;
        let transport = self.transport.as_ref();
        match command {
            Command::ElementGet(request) => element::get(store, transport, request).await,
            Command::ElementPropertyChange(change) => {
                element::property_change(store, transport, &change).await
            }
            Command::ElementDelete(request) => {
                element::delete_elements(store, transport, request).await
            }
            Command::ElementFocus(request) => {
                let store = store.clone();
                self.focus.submit(request.element_ids, move |ids: Vec<String>| {
                    if let Err(err) = store.dispatch(element::set_focus(&ids)) {
                        warn!(error = %err, "focus update failed");
                    }
                });
                Ok(())
            }
            Command::SearchResults(elements) => element::put_search_results(store, elements),
            Command::ProductList(request) => {
                product::list(store, transport, request.initial_product_id).await
            }
            Command::ProductGet(request) => {
                product::get(store, transport, &request.product_id, request.invalidate).await
            }
            Command::ProductChanged(request) => {
                product::changed_on_server(store, transport, &request.product_id).await
            }
            Command::ProductSelect(request) => product::select(store, request.product_id).await,
            Command::ProductUpdateTitle(request) => {
                product::update_title(store, transport, &request.product_id, &request.title).await
            }
            Command::ProductRemove(request) => product::remove(store, &request.product_id).await,
            Command::GraphSetPositions(request) => {
                graph::set_positions(store, transport, &request.product_id, request.update_vertices)
                    .await
            }
            Command::GraphRemoveElements(request) => {
                graph::remove_elements(store, transport, &request.product_id, request.elements)
                    .await
            }
            Command::GraphCollapse(request) => graph::collapse_nodes(
                store,
                transport,
                &request.product_id,
                request.children,
                request.pos,
                request.parent,
            )
            .await
            .map(drop),
            Command::GraphUncollapse(request) => {
                graph::uncollapse_nodes(store, transport, &request.product_id, &request.collapsed_node_id)
                    .await
            }
            Command::GraphSnapToGrid(request) => {
                graph::snap_to_grid(store, transport, request.product_id.as_deref()).await
            }
            Command::GraphDropElements(request) => {
                let origin = request.position.map(|pos| (pos.x, pos.y));
                graph::drop_elements(store, transport, &request.product_id, request.elements, origin)
                    .await
            }
            Command::GraphAddRelated(request) => {
                graph::add_related(store, transport, &request.product_id, request.vertices)
                    .await
                    .map(drop)
            }
            Command::OntologyGet(request) => {
                ontology::get(store, transport, request.workspace_id).await
            }
            Command::ConfigurationGet(request) => {
                configuration::get(store, transport, request.locale).await
            }
        }
    }
}

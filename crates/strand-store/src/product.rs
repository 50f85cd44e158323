// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Product slice: graph, map and table views per workspace.
//!
//! `extendedData` is kept as raw JSON. Graph products use `vertices` and
//! `compoundNodes` maps keyed by id and an `edges` map keyed by an
//! append-only integer index; see [`crate::graph`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strand_proto::Action;
use strand_transport::{AjaxRequest, Transport};
use tracing::{debug, warn};

use crate::element::{self, is_tombstone, record_id, ElementUpdate, GetElements, ELEMENT_UPDATE};
use crate::state::payload;
use crate::{Store, StoreError};

/// Replaces a workspace's product list.
pub const PRODUCT_LIST: &str = "PRODUCT_LIST";
/// Replaces the product type list.
pub const PRODUCT_UPDATE_TYPES: &str = "PRODUCT_UPDATE_TYPES";
/// Marks a rename in flight or commits a title.
pub const PRODUCT_UPDATE_TITLE: &str = "PRODUCT_UPDATE_TITLE";
/// Selects the active product.
pub const PRODUCT_SELECT: &str = "PRODUCT_SELECT";
/// Stores a full product.
pub const PRODUCT_UPDATE: &str = "PRODUCT_UPDATE";
/// Updates the preview hash.
pub const PRODUCT_PREVIEW_UPDATE: &str = "PRODUCT_PREVIEW_UPDATE";
/// Drops a product.
pub const PRODUCT_REMOVE: &str = "PRODUCT_REMOVE";
/// Replaces a product viewport.
pub const PRODUCT_UPDATE_VIEWPORT: &str = "PRODUCT_UPDATE_VIEWPORT";
/// Filters elements out of a product.
pub const PRODUCT_REMOVE_ELEMENTS: &str = "PRODUCT_REMOVE_ELEMENTS";
/// Sets one key of `data`.
pub const PRODUCT_UPDATE_DATA: &str = "PRODUCT_UPDATE_DATA";
/// Sets one key of `extendedData`.
pub const PRODUCT_UPDATE_EXTENDED_DATA: &str = "PRODUCT_UPDATE_EXTENDED_DATA";

/// One product.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Product id.
    pub id: String,
    /// Owning workspace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workspace_id: String,
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Product kind (graph, map, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// True while a rename is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading: Option<bool>,
    /// Thumbnail hash.
    #[serde(
        rename = "previewMD5",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub preview_md5: Option<String>,
    /// Persisted product data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    /// Elements and layout of the view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_data: Option<Map<String, Value>>,
    /// Client-only sidecar, never sent to the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_data: Option<Map<String, Value>>,
    /// Server fields this client does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Products of one workspace.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceProducts {
    /// Products keyed by id.
    pub products: BTreeMap<String, Product>,
    /// List request in flight.
    pub loading: bool,
    /// List loaded at least once.
    pub loaded: bool,
    /// Active product.
    pub selected: Option<String>,
    /// Pan/zoom per product id.
    pub viewports: BTreeMap<String, Value>,
}

/// Product slice.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ProductState {
    /// Per-workspace products.
    pub workspaces: BTreeMap<String, WorkspaceProducts>,
    /// Product kinds offered by the server.
    pub types: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListUpdate {
    workspace_id: String,
    #[serde(default)]
    loading: bool,
    #[serde(default)]
    loaded: bool,
    #[serde(default)]
    products: Vec<Product>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductRef {
    workspace_id: String,
    product_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    loading: bool,
    #[serde(default)]
    md5: Option<String>,
    #[serde(default)]
    viewport: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyUpdate {
    workspace_id: String,
    product_id: String,
    key: String,
    value: Value,
}

/// Element ids to filter out of a product.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElementSelection {
    /// Vertices, matched by `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_ids: Option<Vec<String>>,
    /// Edges, matched by `edgeId`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_ids: Option<Vec<String>>,
    /// Compound nodes, matched by `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapsed_node_ids: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ElementsRemoval {
    pub(crate) workspace_id: String,
    pub(crate) product_id: String,
    pub(crate) elements: ElementSelection,
}

#[derive(Deserialize)]
struct ProductRecord {
    product: Product,
}

impl ProductState {
    /// Product by workspace and id.
    pub fn product(&self, workspace_id: &str, product_id: &str) -> Option<&Product> {
        self.workspaces.get(workspace_id)?.products.get(product_id)
    }

    pub(crate) fn product_mut(
        &mut self,
        workspace_id: &str,
        product_id: &str,
    ) -> Option<&mut Product> {
        self.workspaces
            .get_mut(workspace_id)?
            .products
            .get_mut(product_id)
    }

    pub(crate) fn reduce(&mut self, action: &Action) {
        match action.kind.as_str() {
            PRODUCT_LIST => {
                let Some(list) = payload::<ListUpdate>(action) else {
                    return;
                };
                let listing = self.workspaces.entry(list.workspace_id).or_default();
                listing.products = list
                    .products
                    .into_iter()
                    .map(|product| (product.id.clone(), product))
                    .collect();
                listing.loading = list.loading;
                listing.loaded = list.loaded;
            }
            PRODUCT_UPDATE_TYPES => {
                if let Some(Value::Array(types)) = action.payload.get("types") {
                    self.types.clone_from(types);
                }
            }
            PRODUCT_UPDATE_TITLE => {
                let Some(change) = payload::<ProductRef>(action) else {
                    return;
                };
                let Some(product_id) = change.product_id.as_deref() else {
                    return;
                };
                let Some(product) = self.product_mut(&change.workspace_id, product_id) else {
                    return;
                };
                if change.loading {
                    product.loading = Some(true);
                } else if let Some(title) = change.title {
                    product.loading = Some(false);
                    product.title = Some(title);
                }
            }
            PRODUCT_SELECT => {
                if let Some(change) = payload::<ProductRef>(action) {
                    self.workspaces
                        .entry(change.workspace_id)
                        .or_default()
                        .selected = change.product_id.filter(|id| !id.is_empty());
                }
            }
            PRODUCT_UPDATE => {
                let Some(ProductRecord { mut product }) = payload(action) else {
                    return;
                };
                let products = &mut self
                    .workspaces
                    .entry(product.workspace_id.clone())
                    .or_default()
                    .products;
                if product.local_data.is_none() {
                    product.local_data = products
                        .get(&product.id)
                        .and_then(|prev| prev.local_data.clone());
                }
                products.insert(product.id.clone(), product);
            }
            PRODUCT_PREVIEW_UPDATE => {
                let Some(change) = payload::<ProductRef>(action) else {
                    return;
                };
                if let Some(product) = change
                    .product_id
                    .as_deref()
                    .and_then(|id| self.product_mut(&change.workspace_id, id))
                {
                    product.preview_md5 = change.md5;
                }
            }
            PRODUCT_REMOVE => {
                let Some(ProductRef {
                    workspace_id,
                    product_id: Some(product_id),
                    ..
                }) = payload(action)
                else {
                    return;
                };
                if let Some(listing) = self.workspaces.get_mut(&workspace_id) {
                    listing.products.remove(&product_id);
                    listing.viewports.remove(&product_id);
                    if listing.selected.as_deref() == Some(product_id.as_str()) {
                        listing.selected = None;
                    }
                }
            }
            PRODUCT_UPDATE_VIEWPORT => {
                let Some(ProductRef {
                    workspace_id,
                    product_id: Some(product_id),
                    viewport,
                    ..
                }) = payload(action)
                else {
                    return;
                };
                self.workspaces
                    .entry(workspace_id)
                    .or_default()
                    .viewports
                    .insert(product_id, viewport.unwrap_or(Value::Null));
            }
            PRODUCT_REMOVE_ELEMENTS => {
                let Some(removal) = payload::<ElementsRemoval>(action) else {
                    return;
                };
                if let Some(extended) = self
                    .product_mut(&removal.workspace_id, &removal.product_id)
                    .and_then(|product| product.extended_data.as_mut())
                {
                    remove_selection(extended, &removal.elements);
                }
            }
            PRODUCT_UPDATE_DATA | PRODUCT_UPDATE_EXTENDED_DATA => {
                let Some(update) = payload::<KeyUpdate>(action) else {
                    return;
                };
                let Some(product) = self.product_mut(&update.workspace_id, &update.product_id)
                else {
                    return;
                };
                let target = if action.kind == PRODUCT_UPDATE_DATA {
                    &mut product.data
                } else {
                    &mut product.extended_data
                };
                target
                    .get_or_insert_with(Map::new)
                    .insert(update.key, update.value);
            }
            ELEMENT_UPDATE => {
                let Some(update) = payload::<ElementUpdate>(action) else {
                    return;
                };
                let Some(listing) = self.workspaces.get_mut(&update.workspace_id) else {
                    return;
                };
                for extended in listing
                    .products
                    .values_mut()
                    .filter_map(|product| product.extended_data.as_mut())
                {
                    if let Some(vertices) = &update.vertices {
                        mark_viewable(extended, "vertices", "id", vertices);
                    }
                    if let Some(edges) = &update.edges {
                        mark_viewable(extended, "edges", "edgeId", edges);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Flag product entries whose element became a tombstone as `unauthorized`,
/// and clear the flag when the element is readable again.
fn mark_viewable(extended: &mut Map<String, Value>, key: &str, id_field: &str, updates: &[Value]) {
    let Some(Value::Object(entries)) = extended.get_mut(key) else {
        return;
    };
    for update in updates {
        let Some(id) = record_id(update) else {
            continue;
        };
        let deleted = is_tombstone(update);
        for entry in entries.values_mut() {
            if entry.get(id_field).and_then(Value::as_str) != Some(id) {
                continue;
            }
            if let Value::Object(fields) = entry {
                if deleted {
                    fields.insert("unauthorized".to_owned(), Value::Bool(true));
                } else {
                    fields.remove("unauthorized");
                }
            }
        }
    }
}

pub(crate) fn remove_selection(extended: &mut Map<String, Value>, selection: &ElementSelection) {
    for (key, id_field, ids) in [
        ("vertices", "id", &selection.vertex_ids),
        ("edges", "edgeId", &selection.edge_ids),
        ("compoundNodes", "id", &selection.collapsed_node_ids),
    ] {
        let Some(ids) = ids else {
            continue;
        };
        if let Some(Value::Object(entries)) = extended.get_mut(key) {
            entries.retain(|_, entry| {
                !entry
                    .get(id_field)
                    .and_then(Value::as_str)
                    .is_some_and(|id| ids.iter().any(|gone| gone == id))
            });
        }
    }
}

/// `PRODUCT_SELECT` action.
pub fn select_action(workspace_id: &str, product_id: Option<&str>) -> Action {
    Action::new(
        PRODUCT_SELECT,
        json!({ "workspaceId": workspace_id, "productId": product_id }),
    )
}

/// `PRODUCT_PREVIEW_UPDATE` action.
pub fn preview_changed(workspace_id: &str, product_id: &str, md5: &str) -> Action {
    Action::new(
        PRODUCT_PREVIEW_UPDATE,
        json!({ "workspaceId": workspace_id, "productId": product_id, "md5": md5 }),
    )
}

/// `PRODUCT_REMOVE` action.
pub fn remove_action(workspace_id: &str, product_id: &str) -> Action {
    Action::new(
        PRODUCT_REMOVE,
        json!({ "workspaceId": workspace_id, "productId": product_id }),
    )
}

/// `PRODUCT_UPDATE_VIEWPORT` action.
pub fn update_viewport(workspace_id: &str, product_id: &str, viewport: Value) -> Action {
    Action::new(
        PRODUCT_UPDATE_VIEWPORT,
        json!({ "workspaceId": workspace_id, "productId": product_id, "viewport": viewport }),
    )
}

/// `PRODUCT_UPDATE_DATA` action.
pub fn update_data(workspace_id: &str, product_id: &str, key: &str, value: Value) -> Action {
    Action::new(
        PRODUCT_UPDATE_DATA,
        json!({ "workspaceId": workspace_id, "productId": product_id, "key": key, "value": value }),
    )
}

/// `PRODUCT_UPDATE_EXTENDED_DATA` action.
pub fn update_extended_data(
    workspace_id: &str,
    product_id: &str,
    key: &str,
    value: Value,
) -> Action {
    Action::new(
        PRODUCT_UPDATE_EXTENDED_DATA,
        json!({ "workspaceId": workspace_id, "productId": product_id, "key": key, "value": value }),
    )
}

fn current_workspace(store: &Store) -> Result<String, StoreError> {
    store
        .state()
        .current_workspace()
        .map(str::to_owned)
        .ok_or(StoreError::NoWorkspace)
}

/// Load the product list of the current workspace once.
///
/// Waits for a current workspace, then fetches types and products and selects
/// `initial_product_id`, or the first product when nothing is selected yet.
pub async fn list(
    store: &Store,
    transport: &dyn Transport,
    initial_product_id: Option<String>,
) -> Result<(), StoreError> {
    let workspace_id = store.current_workspace().await?;
    let (already, selected) = {
        let state = store.state();
        let listing = state.product.workspaces.get(&workspace_id);
        (
            listing.is_some_and(|l| l.loading || l.loaded),
            listing.and_then(|l| l.selected.clone()),
        )
    };
    if already {
        if initial_product_id.is_some() {
            return select(store, initial_product_id).await;
        }
        return Ok(());
    }

    store.dispatch(Action::new(
        PRODUCT_LIST,
        json!({ "workspaceId": workspace_id, "loading": true, "loaded": false }),
    ))?;
    let body = match transport.send(AjaxRequest::get("/product/all")).await {
        Ok(response) => response.into_json(),
        Err(err) => {
            store.dispatch(Action::new(
                PRODUCT_LIST,
                json!({ "workspaceId": workspace_id, "loading": false, "loaded": false }),
            ))?;
            return Err(err.into());
        }
    };
    let types = body.get("types").cloned().unwrap_or_else(|| json!([]));
    let products = body.get("products").cloned().unwrap_or_else(|| json!([]));
    store.dispatch(Action::new(PRODUCT_UPDATE_TYPES, json!({ "types": types })))?;
    store.dispatch(Action::new(
        PRODUCT_LIST,
        json!({
            "workspaceId": workspace_id,
            "loading": false,
            "loaded": true,
            "products": products,
        }),
    ))?;
    if initial_product_id.is_some() || selected.is_none() {
        select(store, initial_product_id).await?;
    }
    Ok(())
}

/// Select `product_id`, or the first product by title when `None`.
pub async fn select(store: &Store, product_id: Option<String>) -> Result<(), StoreError> {
    let workspace_id = current_workspace(store)?;
    let product_id = product_id.or_else(|| {
        let state = store.state();
        let listing = state.product.workspaces.get(&workspace_id)?;
        let mut products: Vec<&Product> = listing.products.values().collect();
        products.sort_by(|a, b| (&a.title, &a.id).cmp(&(&b.title, &b.id)));
        products.first().map(|p| p.id.clone())
    });
    store.dispatch(select_action(&workspace_id, product_id.as_deref()))
}

/// Load one product with its extended data, then the elements it shows.
///
/// A product that already has extended data is left alone unless
/// `invalidate` is set.
pub async fn get(
    store: &Store,
    transport: &dyn Transport,
    product_id: &str,
    invalidate: bool,
) -> Result<(), StoreError> {
    let workspace_id = current_workspace(store)?;
    let cached = store
        .state()
        .product
        .product(&workspace_id, product_id)
        .is_some_and(|p| p.extended_data.is_some());
    if cached && !invalidate {
        debug!(product = %product_id, "product already loaded");
        return Ok(());
    }

    let mut fields = Map::new();
    fields.insert("productId".to_owned(), json!(product_id));
    fields.insert("includeExtended".to_owned(), json!(true));
    fields.insert(
        "params".to_owned(),
        json!({ "includeVertices": true, "includeEdges": true }),
    );
    let mut body = transport
        .send(AjaxRequest::get("/product").with_fields(fields))
        .await?
        .into_json();
    normalize_extended(&mut body)?;
    let mut product: Product =
        serde_json::from_value(body).map_err(|err| StoreError::invalid("GET /product", err))?;
    if product.workspace_id.is_empty() {
        product.workspace_id.clone_from(&workspace_id);
    }

    let (vertex_ids, edge_ids) = product
        .extended_data
        .as_ref()
        .map(referenced_elements)
        .unwrap_or_default();
    store.dispatch(Action::new(PRODUCT_UPDATE, json!({ "product": product })))?;
    element::get(
        store,
        transport,
        GetElements {
            workspace_id,
            vertex_ids,
            edge_ids,
            invalidate: false,
        },
    )
    .await
}

/// Server pushed a change: refetch the product.
pub async fn changed_on_server(
    store: &Store,
    transport: &dyn Transport,
    product_id: &str,
) -> Result<(), StoreError> {
    get(store, transport, product_id, true).await
}

/// Rename a product. The title is marked loading until the server answers.
pub async fn update_title(
    store: &Store,
    transport: &dyn Transport,
    product_id: &str,
    title: &str,
) -> Result<(), StoreError> {
    let workspace_id = current_workspace(store)?;
    let Some(previous) = store
        .state()
        .product
        .product(&workspace_id, product_id)
        .cloned()
    else {
        warn!(product = %product_id, "rename of unknown product");
        return Ok(());
    };
    let title_action = |title: Option<&str>, loading: bool| {
        Action::new(
            PRODUCT_UPDATE_TITLE,
            json!({
                "workspaceId": workspace_id,
                "productId": product_id,
                "title": title,
                "loading": loading,
            }),
        )
    };
    store.dispatch(title_action(None, true))?;

    let mut fields = Map::new();
    fields.insert("productId".to_owned(), json!(product_id));
    fields.insert("title".to_owned(), json!(title));
    if let Some(kind) = &previous.kind {
        fields.insert("kind".to_owned(), json!(kind));
    }
    match transport
        .send(AjaxRequest::post("/product").with_fields(fields))
        .await
    {
        Ok(_) => store.dispatch(title_action(Some(title), false)),
        Err(err) => {
            let restored = previous.title.as_deref().unwrap_or_default();
            store.dispatch(title_action(Some(restored), false))?;
            Err(err.into())
        }
    }
}

/// Drop a product the server deleted; reselect if it was active.
pub async fn remove(store: &Store, product_id: &str) -> Result<(), StoreError> {
    let workspace_id = current_workspace(store)?;
    let was_selected = {
        let state = store.state();
        let Some(listing) = state.product.workspaces.get(&workspace_id) else {
            return Ok(());
        };
        if !listing.products.contains_key(product_id) {
            return Ok(());
        }
        listing.selected.as_deref() == Some(product_id)
    };
    store.dispatch(remove_action(&workspace_id, product_id))?;
    if was_selected {
        select(store, None).await?;
    }
    Ok(())
}

/// Decode `extendedData` sent as JSON text and key list-shaped sections.
fn normalize_extended(product: &mut Value) -> Result<(), StoreError> {
    let Some(fields) = product.as_object_mut() else {
        return Err(StoreError::invalid("GET /product", "product is not an object"));
    };
    if let Some(Value::String(text)) = fields.get("extendedData") {
        let decoded: Value = serde_json::from_str(text)
            .map_err(|err| StoreError::invalid("product extendedData", err))?;
        fields.insert("extendedData".to_owned(), decoded);
    }
    let Some(Value::Object(extended)) = fields.get_mut("extendedData") else {
        return Ok(());
    };
    for key in ["vertices", "compoundNodes"] {
        if let Some(Value::Array(items)) = extended.get(key) {
            let keyed: Map<String, Value> = items
                .iter()
                .filter_map(|item| Some((record_id(item)?.to_owned(), item.clone())))
                .collect();
            extended.insert(key.to_owned(), Value::Object(keyed));
        }
    }
    if let Some(Value::Array(items)) = extended.get("edges") {
        let indexed: Map<String, Value> = items
            .iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), item.clone()))
            .collect();
        extended.insert("edges".to_owned(), Value::Object(indexed));
    }
    Ok(())
}

fn referenced_elements(extended: &Map<String, Value>) -> (Vec<String>, Vec<String>) {
    let ids = |key: &str, field: &str| -> Vec<String> {
        extended
            .get(key)
            .and_then(Value::as_object)
            .map(|entries| {
                entries
                    .values()
                    .filter(|entry| {
                        entry.get("type").and_then(Value::as_str) != Some("compoundNode")
                    })
                    .filter_map(|entry| entry.get(field).and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    };
    (ids("vertices", "id"), ids("edges", "edgeId"))
}

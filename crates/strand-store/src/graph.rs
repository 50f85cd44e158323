// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph product plugin: positions, element removal, compound (collapsed)
//! nodes, the append-only edge index, ghost animations, grid snapping and
//! layout of dropped elements, plus the undo pairs for every graph edit.
//!
//! Registered as a [`StoreExtension`] by [`register`]; nothing here runs
//! unless the plugin is installed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strand_proto::Action;
use strand_registry::{ExtensionId, ExtensionRegistry};
use strand_transport::{AjaxRequest, Transport};
use tracing::debug;
use uuid::Uuid;

use crate::element::{self, ElementUpdate};
use crate::product::{self, remove_selection, ElementSelection, ElementsRemoval, PRODUCT_REMOVE};
use crate::state::{payload, RootState};
use crate::store::{StoreExtension, UndoPair, STORE_POINT};
use crate::{Store, StoreError};

/// Moves or inserts vertices and compound nodes.
pub const PRODUCT_GRAPH_SET_POSITIONS: &str = "PRODUCT_GRAPH_SET_POSITIONS";
/// Removes vertices, edges, and compound nodes from a graph product.
pub const PRODUCT_GRAPH_REMOVE_ELEMENTS: &str = "PRODUCT_GRAPH_REMOVE_ELEMENTS";
/// Appends edge records to the edge index.
pub const PRODUCT_ADD_EDGE_IDS: &str = "PRODUCT_ADD_EDGE_IDS";
/// Starts ghost animations at a position.
pub const PRODUCT_GRAPH_ADD_GHOSTS: &str = "PRODUCT_GRAPH_ADD_GHOSTS";
/// Ends one ghost animation.
pub const PRODUCT_GRAPH_REMOVE_GHOST: &str = "PRODUCT_GRAPH_REMOVE_GHOST";
/// Folds entries into a new compound node.
pub const PRODUCT_GRAPH_COLLAPSE_NODES: &str = "PRODUCT_GRAPH_COLLAPSE_NODES";
/// Dissolves a compound node, handing its children to its parent.
pub const PRODUCT_GRAPH_UNCOLLAPSE_NODES: &str = "PRODUCT_GRAPH_UNCOLLAPSE_NODES";

/// Parent of top-level graph entries.
pub const ROOT_NODE: &str = "root";
/// Horizontal grid step; also the column width of generated layouts.
pub const GRID_X: i64 = 175;
/// Vertical grid step; also the row height of generated layouts.
pub const GRID_Y: i64 = 75;

/// Graph plugin slice.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphState {
    /// Ghost animations keyed by element id.
    pub animating_ghosts: BTreeMap<String, Value>,
    /// Next edge index per (workspace, product); indices are never reused.
    #[serde(skip)]
    edge_cursors: BTreeMap<(String, String), u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetPositions {
    workspace_id: String,
    product_id: String,
    #[serde(default)]
    update_vertices: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddEdges {
    workspace_id: String,
    product_id: String,
    #[serde(default)]
    edges: Vec<Value>,
}

/// A compound node as kept under `extendedData.compoundNodes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollapsedNode {
    /// Node id.
    pub id: String,
    /// Vertex or compound node ids folded into this node.
    pub children: Vec<String>,
    /// Enclosing node; [`ROOT_NODE`] at the top level.
    #[serde(default = "root_node")]
    pub parent: String,
    /// Where the node is drawn.
    pub pos: Value,
}

fn root_node() -> String {
    ROOT_NODE.to_owned()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Collapse {
    workspace_id: String,
    product_id: String,
    collapse_data: CollapsedNode,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Uncollapse {
    workspace_id: String,
    product_id: String,
    collapsed_node_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemovedProduct {
    workspace_id: String,
    product_id: Option<String>,
}

#[derive(Deserialize)]
struct AddGhosts {
    ids: Vec<String>,
    position: Value,
}

#[derive(Deserialize)]
struct RemoveGhost {
    id: String,
}

/// Register the graph reducer and undo pairs at [`STORE_POINT`].
pub fn register(registry: &ExtensionRegistry) -> Result<ExtensionId, StoreError> {
    let mut undo_actions = HashMap::new();
    undo_actions.insert(
        PRODUCT_GRAPH_SET_POSITIONS.to_owned(),
        UndoPair {
            undo: Arc::new(undo_set_positions),
            redo: Arc::new(|redo: &Value| vec![Action::new(PRODUCT_GRAPH_SET_POSITIONS, redo.clone())]),
        },
    );
    undo_actions.insert(
        PRODUCT_GRAPH_REMOVE_ELEMENTS.to_owned(),
        UndoPair {
            undo: Arc::new(undo_remove_elements),
            redo: Arc::new(|redo: &Value| vec![Action::new(PRODUCT_GRAPH_REMOVE_ELEMENTS, redo.clone())]),
        },
    );
    undo_actions.insert(
        PRODUCT_GRAPH_COLLAPSE_NODES.to_owned(),
        UndoPair {
            undo: Arc::new(|undo: &Value| vec![Action::new(PRODUCT_GRAPH_UNCOLLAPSE_NODES, undo.clone())]),
            redo: Arc::new(|redo: &Value| vec![Action::new(PRODUCT_GRAPH_COLLAPSE_NODES, redo.clone())]),
        },
    );
    undo_actions.insert(
        PRODUCT_GRAPH_UNCOLLAPSE_NODES.to_owned(),
        UndoPair {
            undo: Arc::new(|undo: &Value| vec![Action::new(PRODUCT_GRAPH_COLLAPSE_NODES, undo.clone())]),
            redo: Arc::new(|redo: &Value| vec![Action::new(PRODUCT_GRAPH_UNCOLLAPSE_NODES, redo.clone())]),
        },
    );
    Ok(registry.register(
        &STORE_POINT,
        StoreExtension {
            key: "product".to_owned(),
            reducer: Some(Arc::new(reduce)),
            undo_actions,
        },
    )?)
}

/// Graph plugin reducer.
pub fn reduce(state: &mut RootState, action: &Action) {
    match action.kind.as_str() {
        PRODUCT_GRAPH_SET_POSITIONS => {
            if let Some(update) = payload::<SetPositions>(action) {
                set_positions_in(state, &update);
            }
        }
        PRODUCT_GRAPH_REMOVE_ELEMENTS => {
            let Some(removal) = payload::<ElementsRemoval>(action) else {
                return;
            };
            if let Some(extended) = state
                .product
                .product_mut(&removal.workspace_id, &removal.product_id)
                .and_then(|product| product.extended_data.as_mut())
            {
                remove_selection(extended, &removal.elements);
            }
        }
        PRODUCT_ADD_EDGE_IDS => {
            if let Some(update) = payload::<AddEdges>(action) {
                add_edges(state, update);
            }
        }
        PRODUCT_GRAPH_ADD_GHOSTS => {
            if let Some(AddGhosts { ids, position }) = payload(action) {
                for id in ids {
                    state.graph.animating_ghosts.insert(id, position.clone());
                }
            }
        }
        PRODUCT_GRAPH_REMOVE_GHOST => {
            if let Some(RemoveGhost { id }) = payload(action) {
                state.graph.animating_ghosts.remove(&id);
            }
        }
        PRODUCT_GRAPH_COLLAPSE_NODES => {
            if let Some(collapse) = payload::<Collapse>(action) {
                collapse_in(state, collapse);
            }
        }
        PRODUCT_GRAPH_UNCOLLAPSE_NODES => {
            if let Some(uncollapse) = payload::<Uncollapse>(action) {
                uncollapse_in(state, &uncollapse);
            }
        }
        PRODUCT_REMOVE => {
            if let Some(RemovedProduct {
                workspace_id,
                product_id: Some(product_id),
            }) = payload(action)
            {
                state.graph.edge_cursors.remove(&(workspace_id, product_id));
            }
        }
        _ => {}
    }
}

fn set_parent(extended: &mut Map<String, Value>, id: &str, parent: &str) {
    for key in ["vertices", "compoundNodes"] {
        if let Some(Value::Object(fields)) = extended.get_mut(key).and_then(|entries| entries.get_mut(id)) {
            fields.insert("parent".to_owned(), json!(parent));
        }
    }
}

fn collapse_in(state: &mut RootState, collapse: Collapse) {
    let Some(extended) = state
        .product
        .product_mut(&collapse.workspace_id, &collapse.product_id)
        .and_then(|product| product.extended_data.as_mut())
    else {
        return;
    };
    let node = collapse.collapse_data;
    for child in &node.children {
        set_parent(extended, child, &node.id);
    }
    let record = json!({
        "id": node.id,
        "type": "compoundNode",
        "children": node.children,
        "parent": node.parent,
        "pos": node.pos,
        "visible": true,
    });
    if let Value::Object(nodes) = extended
        .entry("compoundNodes")
        .or_insert_with(|| Value::Object(Map::new()))
    {
        nodes.insert(node.id, record);
    }
}

fn uncollapse_in(state: &mut RootState, uncollapse: &Uncollapse) {
    let Some(extended) = state
        .product
        .product_mut(&uncollapse.workspace_id, &uncollapse.product_id)
        .and_then(|product| product.extended_data.as_mut())
    else {
        return;
    };
    let Some(node) = extended
        .get_mut("compoundNodes")
        .and_then(Value::as_object_mut)
        .and_then(|nodes| nodes.remove(&uncollapse.collapsed_node_id))
    else {
        return;
    };
    let parent = node
        .get("parent")
        .and_then(Value::as_str)
        .unwrap_or(ROOT_NODE);
    let children = node.get("children").and_then(Value::as_array).into_iter().flatten();
    for child in children.filter_map(Value::as_str) {
        set_parent(extended, child, parent);
    }
}

fn set_positions_in(state: &mut RootState, update: &SetPositions) {
    let Some(extended) = state
        .product
        .product_mut(&update.workspace_id, &update.product_id)
        .and_then(|product| product.extended_data.as_mut())
    else {
        return;
    };
    let mut updated = BTreeSet::new();
    for key in ["vertices", "compoundNodes"] {
        let Some(Value::Object(entries)) = extended.get_mut(key) else {
            continue;
        };
        for (entry_key, entry) in entries.iter_mut() {
            let id = entry
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(entry_key.as_str())
                .to_owned();
            if let Some(change) = update.update_vertices.get(&id) {
                merge_fields(entry, change);
                updated.insert(id);
            }
        }
    }
    for (id, change) in &update.update_vertices {
        if updated.contains(id) {
            continue;
        }
        let key = match change.get("type").and_then(Value::as_str) {
            Some("vertex") => "vertices",
            Some("compoundNode") => "compoundNodes",
            other => {
                debug!(id = %id, kind = ?other, "new graph entry without a placeable type");
                continue;
            }
        };
        let mut record = change.clone();
        if let Value::Object(fields) = &mut record {
            fields
                .entry("id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Value::Object(entries) = extended
            .entry(key)
            .or_insert_with(|| Value::Object(Map::new()))
        {
            entries.insert(id.clone(), record);
        }
    }
}

fn merge_fields(entry: &mut Value, change: &Value) {
    match (entry, change) {
        (Value::Object(target), Value::Object(fields)) => {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        (entry, change) => *entry = change.clone(),
    }
}

fn add_edges(state: &mut RootState, update: AddEdges) {
    let Some(extended) = state
        .product
        .product_mut(&update.workspace_id, &update.product_id)
        .and_then(|product| product.extended_data.as_mut())
    else {
        return;
    };
    let Value::Object(entries) = extended
        .entry("edges")
        .or_insert_with(|| Value::Object(Map::new()))
    else {
        return;
    };
    let mut indexed: BTreeSet<String> = entries
        .values()
        .filter_map(|edge| edge.get("edgeId").and_then(Value::as_str))
        .map(str::to_owned)
        .collect();
    let next_free = entries
        .keys()
        .filter_map(|key| key.parse::<u64>().ok())
        .max()
        .map_or(0, |max| max + 1);
    let cursor = state
        .graph
        .edge_cursors
        .entry((update.workspace_id, update.product_id))
        .or_insert(0);
    *cursor = (*cursor).max(next_free);
    for edge in update.edges {
        let Some(edge_id) = edge.get("edgeId").and_then(Value::as_str) else {
            continue;
        };
        if !indexed.insert(edge_id.to_owned()) {
            continue;
        }
        entries.insert(cursor.to_string(), edge);
        *cursor += 1;
    }
}

fn undo_set_positions(undo: &Value) -> Vec<Action> {
    let mut actions = vec![Action::new(PRODUCT_GRAPH_SET_POSITIONS, undo.clone())];
    if let Some(elements) = undo.get("elements") {
        actions.push(Action::new(
            PRODUCT_GRAPH_REMOVE_ELEMENTS,
            json!({
                "workspaceId": undo.get("workspaceId"),
                "productId": undo.get("productId"),
                "elements": elements,
            }),
        ));
    }
    actions
}

fn undo_remove_elements(undo: &Value) -> Vec<Action> {
    let mut actions = vec![Action::new(PRODUCT_GRAPH_SET_POSITIONS, undo.clone())];
    if let Some(edges) = undo.get("edges").filter(|edges| {
        edges.as_array().is_some_and(|edges| !edges.is_empty())
    }) {
        actions.push(Action::new(
            PRODUCT_ADD_EDGE_IDS,
            json!({
                "workspaceId": undo.get("workspaceId"),
                "productId": undo.get("productId"),
                "edges": edges,
            }),
        ));
    }
    actions
}

#[allow(clippy::cast_possible_truncation)]
fn round_positions(update_vertices: &mut Map<String, Value>) {
    for record in update_vertices.values_mut() {
        let Some(Value::Object(pos)) = record.get_mut("pos") else {
            continue;
        };
        for value in pos.values_mut() {
            if let Some(rounded) = value.as_f64().map(f64::round) {
                *value = json!(rounded as i64);
            }
        }
    }
}

/// Nearest grid line to `value` on a grid of step `snap`.
pub fn snap_coordinate(value: i64, snap: i64) -> i64 {
    let diff = value % snap;
    let near = diff.abs() * 2 < snap;
    match (value < 0, near) {
        (_, true) => value - diff,
        (true, false) => value - (snap + diff),
        (false, false) => value + (snap - diff),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn coordinate(pos: &Value, axis: &str) -> Option<i64> {
    let value = pos.get(axis)?;
    value.as_i64().or_else(|| value.as_f64().map(|v| v.round() as i64))
}

/// Positions for entries added to a product: rows of [`GRID_X`]-spaced
/// columns, wrapping after roughly `sqrt(count)` columns.
#[derive(Debug, Clone)]
pub struct LayoutPositions {
    origin: (i64, i64),
    current: Option<(i64, i64)>,
    max_x: i64,
}

impl LayoutPositions {
    /// Layout for `count` entries starting at `origin`, or under the existing
    /// vertices of `extended` when `origin` is `None`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(origin: Option<(i64, i64)>, count: usize, extended: Option<&Map<String, Value>>) -> Self {
        let origin = origin.unwrap_or_else(|| {
            let positions: Vec<(i64, i64)> = extended
                .and_then(|extended| extended.get("vertices"))
                .and_then(Value::as_object)
                .into_iter()
                .flat_map(|vertices| vertices.values())
                .filter_map(|vertex| {
                    let pos = vertex.get("pos")?;
                    Some((coordinate(pos, "x")?, coordinate(pos, "y")?))
                })
                .collect();
            let min_x = positions.iter().map(|(x, _)| *x).min().unwrap_or(0);
            let max_y = positions.iter().map(|(_, y)| *y).max().map_or(0, |y| y + GRID_Y);
            (min_x, max_y)
        });
        Self {
            origin,
            current: None,
            max_x: (count as f64).sqrt().round() as i64 * GRID_X,
        }
    }
}

impl Iterator for LayoutPositions {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let next = match self.current {
            None => self.origin,
            Some((x, y)) if x + GRID_X - self.origin.0 > self.max_x => (self.origin.0, y + GRID_Y),
            Some((x, y)) => (x + GRID_X, y),
        };
        self.current = Some(next);
        Some(json!({ "x": next.0, "y": next.1 }))
    }
}

fn product_vertex_ids(store: &Store, workspace_id: &str, product_id: &str) -> BTreeSet<String> {
    let state = store.state();
    state
        .product
        .product(workspace_id, product_id)
        .and_then(|product| product.extended_data.as_ref())
        .and_then(|extended| extended.get("vertices"))
        .and_then(Value::as_object)
        .map(|vertices| vertices.keys().cloned().collect())
        .unwrap_or_default()
}

fn layout_for(
    store: &Store,
    workspace_id: &str,
    product_id: &str,
    origin: Option<(i64, i64)>,
    ids: &[String],
) -> Map<String, Value> {
    let state = store.state();
    let extended = state
        .product
        .product(workspace_id, product_id)
        .and_then(|product| product.extended_data.as_ref());
    ids.iter()
        .cloned()
        .zip(LayoutPositions::new(origin, ids.len(), extended))
        .map(|(id, pos)| (id, json!({ "type": "vertex", "pos": pos })))
        .collect()
}

fn editable_workspace(store: &Store) -> Result<Option<String>, StoreError> {
    let state = store.state();
    let workspace_id = state
        .current_workspace()
        .map(str::to_owned)
        .ok_or(StoreError::NoWorkspace)?;
    if state.workspace.is_editable(&workspace_id) {
        Ok(Some(workspace_id))
    } else {
        debug!(workspace = %workspace_id, "workspace is read-only; ignoring graph edit");
        Ok(None)
    }
}

/// Move (or add) vertices and compound nodes, recording an undo entry, then
/// persist the new positions.
///
/// `update_vertices` maps ids to records carrying `pos: {x, y}` and, for new
/// entries, `type`. Coordinates are rounded to whole pixels.
pub async fn set_positions(
    store: &Store,
    transport: &dyn Transport,
    product_id: &str,
    mut update_vertices: Map<String, Value>,
) -> Result<(), StoreError> {
    let Some(workspace_id) = editable_workspace(store)? else {
        return Ok(());
    };
    round_positions(&mut update_vertices);

    let mut prior = Map::new();
    let mut new_vertices = Vec::new();
    let mut new_compounds = Vec::new();
    {
        let state = store.state();
        let extended = state
            .product
            .product(&workspace_id, product_id)
            .and_then(|product| product.extended_data.as_ref());
        for (id, change) in &update_vertices {
            let existing = extended.and_then(|extended| {
                ["vertices", "compoundNodes"]
                    .iter()
                    .find_map(|key| extended.get(*key)?.get(id.as_str()))
            });
            match existing {
                Some(record) => {
                    prior.insert(id.clone(), record.clone());
                }
                None if change.get("type").and_then(Value::as_str) == Some("compoundNode") => {
                    new_compounds.push(id.clone());
                }
                None => new_vertices.push(id.clone()),
            }
        }
    }

    let mut undo = json!({
        "workspaceId": workspace_id,
        "productId": product_id,
        "updateVertices": prior,
    });
    if !new_vertices.is_empty() || !new_compounds.is_empty() {
        undo["elements"] = serde_json::to_value(ElementSelection {
            vertex_ids: Some(new_vertices),
            edge_ids: None,
            collapsed_node_ids: Some(new_compounds),
        })?;
    }
    let redo = json!({
        "workspaceId": workspace_id,
        "productId": product_id,
        "updateVertices": update_vertices,
    });
    store.dispatch(Action::new(
        PRODUCT_GRAPH_SET_POSITIONS,
        json!({
            "workspaceId": workspace_id,
            "productId": product_id,
            "updateVertices": update_vertices,
            "undoScope": workspace_id,
            "undo": undo,
            "redo": redo,
        }),
    ))?;

    let mut fields = Map::new();
    fields.insert("productId".to_owned(), json!(product_id));
    fields.insert(
        "params".to_owned(),
        json!({
            "updateVertices": update_vertices,
            "broadcastOptions": { "preventBroadcastToSourceGuid": true },
        }),
    );
    transport
        .send(AjaxRequest::post("/product").with_fields(fields))
        .await?;
    Ok(())
}

/// Remove elements from a graph product, recording an undo entry that
/// restores them, then persist removed vertices.
pub async fn remove_elements(
    store: &Store,
    transport: &dyn Transport,
    product_id: &str,
    elements: ElementSelection,
) -> Result<(), StoreError> {
    let Some(workspace_id) = editable_workspace(store)? else {
        return Ok(());
    };

    let mut restore = Map::new();
    let mut edges = Vec::new();
    {
        let state = store.state();
        if let Some(extended) = state
            .product
            .product(&workspace_id, product_id)
            .and_then(|product| product.extended_data.as_ref())
        {
            for (key, kind, ids) in [
                ("vertices", "vertex", &elements.vertex_ids),
                ("compoundNodes", "compoundNode", &elements.collapsed_node_ids),
            ] {
                let (Some(ids), Some(Value::Object(entries))) = (ids, extended.get(key)) else {
                    continue;
                };
                for id in ids {
                    if let Some(mut record) = entries.get(id).cloned() {
                        if let Value::Object(fields) = &mut record {
                            fields.insert("type".to_owned(), json!(kind));
                        }
                        restore.insert(id.clone(), record);
                    }
                }
            }
            if let (Some(ids), Some(Value::Object(entries))) =
                (&elements.edge_ids, extended.get("edges"))
            {
                edges.extend(
                    entries
                        .values()
                        .filter(|edge| {
                            edge.get("edgeId")
                                .and_then(Value::as_str)
                                .is_some_and(|id| ids.iter().any(|gone| gone == id))
                        })
                        .cloned(),
                );
            }
        }
    }

    let removal = json!({
        "workspaceId": workspace_id,
        "productId": product_id,
        "elements": elements,
    });
    let mut action_payload = removal.clone();
    action_payload["undoScope"] = json!(workspace_id);
    action_payload["undo"] = json!({
        "workspaceId": workspace_id,
        "productId": product_id,
        "updateVertices": restore,
        "edges": edges,
    });
    action_payload["redo"] = removal;
    store.dispatch(Action::new(PRODUCT_GRAPH_REMOVE_ELEMENTS, action_payload))?;

    let removed_vertices = elements.vertex_ids.unwrap_or_default();
    if !removed_vertices.is_empty() {
        let mut fields = Map::new();
        fields.insert("productId".to_owned(), json!(product_id));
        fields.insert(
            "params".to_owned(),
            json!({ "removeVertices": removed_vertices }),
        );
        transport
            .send(AjaxRequest::post("/product").with_fields(fields))
            .await?;
    }
    Ok(())
}

/// Fold `children` into a new compound node drawn at `pos`, recording an
/// undo entry, then persist the node.
///
/// Returns the new node id; `None` when the workspace is read-only or fewer
/// than two children are given.
pub async fn collapse_nodes(
    store: &Store,
    transport: &dyn Transport,
    product_id: &str,
    children: Vec<String>,
    pos: Value,
    parent: Option<String>,
) -> Result<Option<String>, StoreError> {
    let Some(workspace_id) = editable_workspace(store)? else {
        return Ok(None);
    };
    if children.len() < 2 {
        debug!(product = %product_id, "nothing to collapse");
        return Ok(None);
    }
    let node = CollapsedNode {
        id: format!("compound-{}", Uuid::new_v4()),
        children,
        parent: parent.unwrap_or_else(root_node),
        pos,
    };
    let collapse = json!({
        "workspaceId": workspace_id,
        "productId": product_id,
        "collapseData": node,
    });
    let uncollapse = json!({
        "workspaceId": workspace_id,
        "productId": product_id,
        "collapsedNodeId": node.id,
    });
    let mut action_payload = collapse.clone();
    action_payload["undoScope"] = json!(workspace_id);
    action_payload["undo"] = uncollapse;
    action_payload["redo"] = collapse;
    store.dispatch(Action::new(PRODUCT_GRAPH_COLLAPSE_NODES, action_payload))?;

    let mut update = Map::new();
    update.insert(node.id.clone(), serde_json::to_value(&node)?);
    let mut fields = Map::new();
    fields.insert("productId".to_owned(), json!(product_id));
    fields.insert(
        "params".to_owned(),
        json!({
            "updateVertices": update,
            "broadcastOptions": { "preventBroadcastToSourceGuid": true },
        }),
    );
    transport
        .send(AjaxRequest::post("/product").with_fields(fields))
        .await?;
    Ok(Some(node.id))
}

/// Dissolve compound node `collapsed_node_id`, recording an undo entry that
/// folds it again, then persist the removal.
pub async fn uncollapse_nodes(
    store: &Store,
    transport: &dyn Transport,
    product_id: &str,
    collapsed_node_id: &str,
) -> Result<(), StoreError> {
    let Some(workspace_id) = editable_workspace(store)? else {
        return Ok(());
    };
    let node = {
        let state = store.state();
        state
            .product
            .product(&workspace_id, product_id)
            .and_then(|product| product.extended_data.as_ref())
            .and_then(|extended| extended.get("compoundNodes")?.get(collapsed_node_id))
            .cloned()
    };
    let Some(node) = node else {
        debug!(node = %collapsed_node_id, "no such compound node");
        return Ok(());
    };
    let node: CollapsedNode = serde_json::from_value(node)?;
    let uncollapse = json!({
        "workspaceId": workspace_id,
        "productId": product_id,
        "collapsedNodeId": collapsed_node_id,
    });
    let mut action_payload = uncollapse.clone();
    action_payload["undoScope"] = json!(workspace_id);
    action_payload["undo"] = json!({
        "workspaceId": workspace_id,
        "productId": product_id,
        "collapseData": node,
    });
    action_payload["redo"] = uncollapse;
    store.dispatch(Action::new(PRODUCT_GRAPH_UNCOLLAPSE_NODES, action_payload))?;

    let mut fields = Map::new();
    fields.insert("productId".to_owned(), json!(product_id));
    fields.insert(
        "params".to_owned(),
        json!({ "removeVertices": [collapsed_node_id] }),
    );
    transport
        .send(AjaxRequest::post("/product").with_fields(fields))
        .await?;
    Ok(())
}

/// Move every vertex of a product (the selected one when `product_id` is
/// `None`) onto the nearest grid point, as one undoable edit.
pub async fn snap_to_grid(
    store: &Store,
    transport: &dyn Transport,
    product_id: Option<&str>,
) -> Result<(), StoreError> {
    let Some(workspace_id) = editable_workspace(store)? else {
        return Ok(());
    };
    let (product_id, update_vertices) = {
        let state = store.state();
        let Some(product_id) = product_id.map(str::to_owned).or_else(|| {
            state
                .product
                .workspaces
                .get(&workspace_id)
                .and_then(|listing| listing.selected.clone())
        }) else {
            return Ok(());
        };
        let vertices = state
            .product
            .product(&workspace_id, &product_id)
            .and_then(|product| product.extended_data.as_ref())
            .and_then(|extended| extended.get("vertices"))
            .and_then(Value::as_object);
        let mut update = Map::new();
        for (id, vertex) in vertices.into_iter().flatten() {
            let Some(pos) = vertex.get("pos") else {
                continue;
            };
            let (Some(x), Some(y)) = (coordinate(pos, "x"), coordinate(pos, "y")) else {
                continue;
            };
            let snapped = (snap_coordinate(x, GRID_X), snap_coordinate(y, GRID_Y));
            if snapped != (x, y) {
                update.insert(id.clone(), json!({ "pos": { "x": snapped.0, "y": snapped.1 } }));
            }
        }
        (product_id, update)
    };
    if update_vertices.is_empty() {
        return Ok(());
    }
    set_positions(store, transport, &product_id, update_vertices).await
}

/// Add dropped vertices, and the endpoints of dropped edges, to a product,
/// laid out from `position` (or under the existing vertices), then select it.
///
/// Vertices already on the product are left where they are.
pub async fn drop_elements(
    store: &Store,
    transport: &dyn Transport,
    product_id: &str,
    elements: ElementSelection,
    position: Option<(i64, i64)>,
) -> Result<(), StoreError> {
    let Some(workspace_id) = editable_workspace(store)? else {
        return Ok(());
    };
    let mut candidates = Vec::new();
    let edge_ids = elements.edge_ids.unwrap_or_default();
    if !edge_ids.is_empty() {
        let mut fields = Map::new();
        fields.insert("workspaceId".to_owned(), json!(workspace_id));
        fields.insert("edgeIds".to_owned(), json!(edge_ids));
        let body = transport
            .send(AjaxRequest::post("/edge/multiple").with_fields(fields))
            .await?
            .into_json();
        for edge in body.get("edges").and_then(Value::as_array).into_iter().flatten() {
            for end in ["inVertexId", "outVertexId"] {
                if let Some(id) = edge.get(end).and_then(Value::as_str) {
                    candidates.push(id.to_owned());
                }
            }
        }
    }
    candidates.extend(elements.vertex_ids.unwrap_or_default());

    let mut seen = product_vertex_ids(store, &workspace_id, product_id);
    let added: Vec<String> = candidates
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect();
    if added.is_empty() {
        return Ok(());
    }
    let update_vertices = layout_for(store, &workspace_id, product_id, position, &added);
    set_positions(store, transport, product_id, update_vertices).await?;
    product::select(store, Some(product_id.to_owned())).await
}

/// Cache `vertices` and add the ones not yet on the product below its
/// existing vertices. Returns the ids of every given vertex.
pub async fn add_related(
    store: &Store,
    transport: &dyn Transport,
    product_id: &str,
    vertices: Vec<Value>,
) -> Result<Vec<String>, StoreError> {
    let ids: Vec<String> = vertices
        .iter()
        .filter_map(|vertex| vertex.get("id").and_then(Value::as_str))
        .map(str::to_owned)
        .collect();
    let Some(workspace_id) = editable_workspace(store)? else {
        return Ok(ids);
    };
    let mut seen = product_vertex_ids(store, &workspace_id, product_id);
    let added: Vec<String> = ids.iter().filter(|id| seen.insert((*id).clone())).cloned().collect();
    if added.is_empty() {
        return Ok(ids);
    }
    store.dispatch(element::update(&ElementUpdate {
        workspace_id: workspace_id.clone(),
        vertices: Some(vertices),
        edges: None,
    }))?;
    let update_vertices = layout_for(store, &workspace_id, product_id, None, &added);
    set_positions(store, transport, product_id, update_vertices).await?;
    Ok(ids)
}

/// `PRODUCT_ADD_EDGE_IDS` action.
pub fn add_edge_ids(workspace_id: &str, product_id: &str, edges: Vec<Value>) -> Action {
    Action::new(
        PRODUCT_ADD_EDGE_IDS,
        json!({ "workspaceId": workspace_id, "productId": product_id, "edges": edges }),
    )
}

/// `PRODUCT_GRAPH_ADD_GHOSTS` action.
pub fn add_ghosts(ids: &[String], position: Value) -> Action {
    Action::new(
        PRODUCT_GRAPH_ADD_GHOSTS,
        json!({ "ids": ids, "position": position }),
    )
}

/// `PRODUCT_GRAPH_REMOVE_GHOST` action.
pub fn remove_ghost(id: &str) -> Action {
    Action::new(PRODUCT_GRAPH_REMOVE_GHOST, json!({ "id": id }))
}

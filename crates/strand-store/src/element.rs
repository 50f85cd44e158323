// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Normalized entity slice: vertices and edges per workspace.
//!
//! Records are server JSON keyed by `id`. A record the server no longer has
//! is kept as a tombstone (`{"id": …, "_DELETED": true}`) so later lookups
//! answer locally instead of going back to the network. The reducer only adds,
//! replaces, or tombstones; nothing is ever removed from a workspace map.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use futures_util::future::{join, join_all};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strand_proto::Action;
use strand_transport::{AjaxRequest, Transport};
use tracing::{debug, warn};

use crate::state::payload;
use crate::{Store, StoreError};

/// Merges element records into a workspace.
pub const ELEMENT_UPDATE: &str = "ELEMENT_UPDATE";
/// Sets the derived `edgeLabels` list on vertices.
pub const ELEMENT_UPDATE_EDGELABELS: &str = "ELEMENT_UPDATE_EDGELABELS";
/// Sets the elements currently highlighted by the UI.
pub const ELEMENT_SET_FOCUS: &str = "ELEMENT_SET_FOCUS";
/// Tombstone marker field.
pub const DELETED_FLAG: &str = "_DELETED";

/// Vertex or edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Graph vertex.
    Vertex,
    /// Graph edge.
    Edge,
}

impl ElementKind {
    /// Route segment (`/vertex/…`, `/edge/…`).
    pub fn route(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Edge => "edge",
        }
    }

    /// Request field carrying id lists.
    pub fn ids_field(self) -> &'static str {
        match self {
            Self::Vertex => "vertexIds",
            Self::Edge => "edgeIds",
        }
    }

    /// Response and payload field carrying records.
    pub fn plural(self) -> &'static str {
        match self {
            Self::Vertex => "vertices",
            Self::Edge => "edges",
        }
    }
}

/// Build a tombstone for `id`.
pub fn tombstone(id: &str) -> Value {
    json!({ "id": id, DELETED_FLAG: true })
}

/// True for tombstone records.
pub fn is_tombstone(record: &Value) -> bool {
    record.get(DELETED_FLAG).and_then(Value::as_bool) == Some(true)
}

pub(crate) fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

/// Elements cached for one workspace.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct WorkspaceElements {
    /// Vertices keyed by id.
    pub vertices: BTreeMap<String, Value>,
    /// Edges keyed by id.
    pub edges: BTreeMap<String, Value>,
}

impl WorkspaceElements {
    /// Cached record (live or tombstone).
    pub fn get(&self, kind: ElementKind, id: &str) -> Option<&Value> {
        self.map(kind).get(id)
    }

    /// Map for one kind.
    pub fn map(&self, kind: ElementKind) -> &BTreeMap<String, Value> {
        match kind {
            ElementKind::Vertex => &self.vertices,
            ElementKind::Edge => &self.edges,
        }
    }

    fn map_mut(&mut self, kind: ElementKind) -> &mut BTreeMap<String, Value> {
        match kind {
            ElementKind::Vertex => &mut self.vertices,
            ElementKind::Edge => &mut self.edges,
        }
    }

    fn merge(&mut self, kind: ElementKind, records: Vec<Value>) {
        let map = self.map_mut(kind);
        for mut record in records {
            let Some(id) = record_id(&record).map(str::to_owned) else {
                continue;
            };
            if !is_tombstone(&record) && record.get("edgeLabels").is_none() {
                if let Some(labels) = map.get(&id).and_then(|prev| prev.get("edgeLabels")) {
                    if let Value::Object(fields) = &mut record {
                        fields.insert("edgeLabels".to_owned(), labels.clone());
                    }
                }
            }
            map.insert(id, record);
        }
    }
}

/// Element slice.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ElementState {
    /// Per-workspace caches.
    pub workspaces: BTreeMap<String, WorkspaceElements>,
    /// Ids the UI is currently focusing.
    pub focusing: Vec<String>,
}

/// `ELEMENT_UPDATE` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementUpdate {
    /// Target workspace.
    pub workspace_id: String,
    /// Vertex records (absent means untouched).
    #[serde(default)]
    pub vertices: Option<Vec<Value>>,
    /// Edge records (absent means untouched).
    #[serde(default)]
    pub edges: Option<Vec<Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EdgeLabelsUpdate {
    workspace_id: String,
    vertex_labels: BTreeMap<String, Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FocusUpdate {
    #[serde(default)]
    element_ids: Vec<String>,
}

impl ElementState {
    /// Cache for `workspace_id`.
    pub fn workspace(&self, workspace_id: &str) -> Option<&WorkspaceElements> {
        self.workspaces.get(workspace_id)
    }

    pub(crate) fn reduce(&mut self, action: &Action) {
        match action.kind.as_str() {
            ELEMENT_UPDATE => {
                if let Some(update) = payload::<ElementUpdate>(action) {
                    let cache = self.workspaces.entry(update.workspace_id).or_default();
                    if let Some(vertices) = update.vertices {
                        cache.merge(ElementKind::Vertex, vertices);
                    }
                    if let Some(edges) = update.edges {
                        cache.merge(ElementKind::Edge, edges);
                    }
                }
            }
            ELEMENT_UPDATE_EDGELABELS => {
                if let Some(update) = payload::<EdgeLabelsUpdate>(action) {
                    let Some(cache) = self.workspaces.get_mut(&update.workspace_id) else {
                        return;
                    };
                    for (vertex_id, labels) in update.vertex_labels {
                        if let Some(Value::Object(vertex)) = cache.vertices.get_mut(&vertex_id) {
                            vertex.insert("edgeLabels".to_owned(), json!(labels));
                        }
                    }
                }
            }
            ELEMENT_SET_FOCUS => {
                if let Some(FocusUpdate { element_ids }) = payload(action) {
                    self.focusing = element_ids;
                }
            }
            _ => {}
        }
    }
}

/// `ELEMENT_UPDATE` action.
pub fn update(update: &ElementUpdate) -> Action {
    Action::new(
        ELEMENT_UPDATE,
        serde_json::to_value(update).unwrap_or(Value::Null),
    )
}

/// `ELEMENT_UPDATE` for a single record; its `type` field picks the map.
pub fn update_element(workspace_id: &str, element: Value) -> Action {
    let is_edge = element.get("type").and_then(Value::as_str) == Some("edge");
    let (vertices, edges) = if is_edge {
        (None, Some(vec![element]))
    } else {
        (Some(vec![element]), None)
    };
    update(&ElementUpdate {
        workspace_id: workspace_id.to_owned(),
        vertices,
        edges,
    })
}

/// `ELEMENT_SET_FOCUS` action.
pub fn set_focus(element_ids: &[String]) -> Action {
    Action::new(ELEMENT_SET_FOCUS, json!({ "elementIds": element_ids }))
}

/// Arguments of [`get`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GetElements {
    /// Workspace to load into.
    pub workspace_id: String,
    /// Vertices wanted.
    #[serde(default)]
    pub vertex_ids: Vec<String>,
    /// Edges wanted.
    #[serde(default)]
    pub edge_ids: Vec<String>,
    /// Refetch even when cached.
    #[serde(default)]
    pub invalidate: bool,
}

/// Arguments of [`delete_elements`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteElements {
    /// Vertices reported deleted.
    #[serde(default)]
    pub vertex_ids: Vec<String>,
    /// Edges reported deleted.
    #[serde(default)]
    pub edge_ids: Vec<String>,
}

/// Load elements into the cache.
///
/// Cached ids (tombstones included) are skipped unless `invalidate` is set.
/// Vertices and edges are fetched concurrently; ids missing from a response
/// are stored as tombstones. Loaded edges then refresh the derived
/// `edgeLabels` of their endpoints.
pub async fn get(
    store: &Store,
    transport: &dyn Transport,
    request: GetElements,
) -> Result<(), StoreError> {
    let state = store.state();
    let cached = state.element.workspace(&request.workspace_id);
    let wanted = |kind: ElementKind, ids: Vec<String>| -> Vec<String> {
        let mut seen = BTreeSet::new();
        ids.into_iter()
            .filter(|id| seen.insert(id.clone()))
            .filter(|id| request.invalidate || cached.and_then(|c| c.get(kind, id)).is_none())
            .collect()
    };
    let vertex_ids = wanted(ElementKind::Vertex, request.vertex_ids.clone());
    let edge_ids = wanted(ElementKind::Edge, request.edge_ids.clone());
    drop(state);
    if vertex_ids.is_empty() && edge_ids.is_empty() {
        debug!(workspace = %request.workspace_id, "all requested elements cached");
        return Ok(());
    }

    let workspace_id = request.workspace_id.as_str();
    let (vertices, edges) = join(
        fetch(transport, ElementKind::Vertex, workspace_id, vertex_ids),
        fetch(transport, ElementKind::Edge, workspace_id, edge_ids),
    )
    .await;

    let mut first_error = None;
    match vertices {
        Ok(records) if !records.is_empty() => store.dispatch(update(&ElementUpdate {
            workspace_id: workspace_id.to_owned(),
            vertices: Some(records),
            edges: None,
        }))?,
        Ok(_) => {}
        Err(err) => first_error = Some(err),
    }
    match edges {
        Ok(records) if !records.is_empty() => {
            store.dispatch(update(&ElementUpdate {
                workspace_id: workspace_id.to_owned(),
                vertices: None,
                edges: Some(records.clone()),
            }))?;
            update_edge_labels(store, workspace_id, &records)?;
        }
        Ok(_) => {}
        Err(err) => {
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

async fn fetch(
    transport: &dyn Transport,
    kind: ElementKind,
    workspace_id: &str,
    ids: Vec<String>,
) -> Result<Vec<Value>, StoreError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut fields = Map::new();
    fields.insert("workspaceId".to_owned(), json!(workspace_id));
    fields.insert(kind.ids_field().to_owned(), json!(ids));
    let route = format!("/{}/multiple", kind.route());
    let body = transport
        .send(AjaxRequest::post(route.as_str()).with_fields(fields))
        .await?
        .into_json();
    let Some(Value::Array(records)) = body.get(kind.plural()) else {
        return Err(StoreError::invalid(route, format!("missing {}", kind.plural())));
    };
    let mut found: HashMap<&str, &Value> = records
        .iter()
        .filter_map(|record| Some((record_id(record)?, record)))
        .collect();
    Ok(ids
        .iter()
        .map(|id| {
            found
                .remove(id.as_str())
                .cloned()
                .unwrap_or_else(|| tombstone(id))
        })
        .collect())
}

/// Recompute `edgeLabels` for the endpoints of `edges` that are cached.
///
/// Labels are unioned with what the vertex already carries.
pub fn update_edge_labels(
    store: &Store,
    workspace_id: &str,
    edges: &[Value],
) -> Result<(), StoreError> {
    let state = store.state();
    let Some(cache) = state.element.workspace(workspace_id) else {
        return Ok(());
    };
    let mut labels: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for edge in edges.iter().filter(|edge| !is_tombstone(edge)) {
        let Some(label) = edge.get("label").and_then(Value::as_str) else {
            continue;
        };
        for end in ["outVertexId", "inVertexId"] {
            let Some(vertex_id) = edge.get(end).and_then(Value::as_str) else {
                continue;
            };
            let Some(vertex) = cache.vertices.get(vertex_id) else {
                continue;
            };
            if is_tombstone(vertex) {
                continue;
            }
            labels
                .entry(vertex_id.to_owned())
                .or_insert_with(|| existing_labels(vertex))
                .insert(label.to_owned());
        }
    }
    drop(state);
    if labels.is_empty() {
        return Ok(());
    }
    store.dispatch(Action::new(
        ELEMENT_UPDATE_EDGELABELS,
        json!({ "workspaceId": workspace_id, "vertexLabels": labels }),
    ))
}

fn existing_labels(vertex: &Value) -> BTreeSet<String> {
    vertex
        .get("edgeLabels")
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// React to a server property change by refetching the element in every
/// workspace where it is relevant.
///
/// A vertex is relevant where it is cached. An edge with both endpoints named
/// is relevant where both endpoints are cached; otherwise where the edge is
/// cached or the workspace is the one the change happened in.
pub async fn property_change(
    store: &Store,
    transport: &dyn Transport,
    change: &Value,
) -> Result<(), StoreError> {
    let field = |key: &str| change.get(key).and_then(Value::as_str);
    let (kind, id) = match (field("graphVertexId"), field("graphEdgeId")) {
        (Some(id), _) => (ElementKind::Vertex, id),
        (None, Some(id)) => (ElementKind::Edge, id),
        (None, None) => {
            debug!("property change without an element id");
            return Ok(());
        }
    };
    let change_workspace = field("workspaceId");
    let endpoints = field("outVertexId").zip(field("inVertexId"));

    let state = store.state();
    let targets: Vec<String> = state
        .element
        .workspaces
        .iter()
        .filter(|(workspace_id, cache)| match (kind, endpoints) {
            (ElementKind::Vertex, _) => cache.vertices.contains_key(id),
            (ElementKind::Edge, Some((out_id, in_id))) => {
                cache.vertices.contains_key(out_id) && cache.vertices.contains_key(in_id)
            }
            (ElementKind::Edge, None) => {
                cache.edges.contains_key(id) || change_workspace == Some(workspace_id.as_str())
            }
        })
        .map(|(workspace_id, _)| workspace_id.clone())
        .collect();
    drop(state);

    let requests = targets.into_iter().map(|workspace_id| {
        let (vertex_ids, edge_ids) = match kind {
            ElementKind::Vertex => (vec![id.to_owned()], Vec::new()),
            ElementKind::Edge => (Vec::new(), vec![id.to_owned()]),
        };
        get(
            store,
            transport,
            GetElements {
                workspace_id,
                vertex_ids,
                edge_ids,
                invalidate: true,
            },
        )
    });
    join_all(requests)
        .await
        .into_iter()
        .find(Result::is_err)
        .unwrap_or(Ok(()))
}

/// Confirm reported deletions with the server and tombstone what is gone.
///
/// Each workspace holding any of the ids gets its own existence check and its
/// own `ELEMENT_UPDATE`.
pub async fn delete_elements(
    store: &Store,
    transport: &dyn Transport,
    request: DeleteElements,
) -> Result<(), StoreError> {
    let state = store.state();
    let mut checks: Vec<(String, ElementKind, Vec<String>)> = Vec::new();
    for (workspace_id, cache) in &state.element.workspaces {
        for (kind, ids) in [
            (ElementKind::Vertex, &request.vertex_ids),
            (ElementKind::Edge, &request.edge_ids),
        ] {
            let held: Vec<String> = ids
                .iter()
                .filter(|id| cache.get(kind, id).is_some())
                .cloned()
                .collect();
            if !held.is_empty() {
                checks.push((workspace_id.clone(), kind, held));
            }
        }
    }
    drop(state);

    for (workspace_id, kind, ids) in checks {
        let mut fields = Map::new();
        fields.insert(kind.ids_field().to_owned(), json!(ids));
        let route = format!("/{}/exists", kind.route());
        let body = transport
            .send(AjaxRequest::post(route.as_str()).with_fields(fields))
            .await?
            .into_json();
        let Some(exists) = body.get("exists").and_then(Value::as_object) else {
            return Err(StoreError::invalid(route, "missing exists"));
        };
        let gone: Vec<Value> = ids
            .iter()
            .filter(|id| exists.get(id.as_str()).and_then(Value::as_bool) != Some(true))
            .map(|id| tombstone(id))
            .collect();
        let (vertices, edges) = match kind {
            ElementKind::Vertex => (gone, Vec::new()),
            ElementKind::Edge => (Vec::new(), gone),
        };
        store.dispatch(update(&ElementUpdate {
            workspace_id,
            vertices: Some(vertices),
            edges: Some(edges),
        }))?;
    }
    Ok(())
}

/// Cache search hits in the current workspace. Hits carry a `type` of
/// `vertex` or `edge` and a `score` that is not stored.
pub fn put_search_results(store: &Store, elements: Vec<Value>) -> Result<(), StoreError> {
    let workspace_id = store
        .state()
        .current_workspace()
        .map(str::to_owned)
        .ok_or(StoreError::NoWorkspace)?;
    let mut vertices = Vec::new();
    let mut edges = Vec::new();
    for mut element in elements {
        if let Value::Object(fields) = &mut element {
            fields.remove("score");
        }
        match element.get("type").and_then(Value::as_str) {
            Some("vertex") => vertices.push(element),
            Some("edge") => edges.push(element),
            other => warn!(kind = ?other, "search result without a known type"),
        }
    }
    store.dispatch(update(&ElementUpdate {
        workspace_id,
        vertices: Some(vertices),
        edges: Some(edges),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reduce(state: &mut ElementState, action: &Action) {
        state.reduce(action);
    }

    #[test]
    fn workspace_ids_never_collide_with_slice_fields() {
        let mut state = ElementState::default();
        reduce(&mut state, &set_focus(&["v9".to_owned()]));
        reduce(
            &mut state,
            &update(&ElementUpdate {
                workspace_id: "focusing".into(),
                vertices: Some(vec![json!({"id": "v1"})]),
                edges: None,
            }),
        );
        let encoded = serde_json::to_value(&state).unwrap();
        assert_eq!(encoded["focusing"], json!(["v9"]));
        assert_eq!(encoded["workspaces"]["focusing"]["vertices"]["v1"], json!({"id": "v1"}));
    }

    #[test]
    fn update_merges_by_id_and_keeps_derived_labels() {
        let mut state = ElementState::default();
        reduce(
            &mut state,
            &update(&ElementUpdate {
                workspace_id: "w1".into(),
                vertices: Some(vec![json!({"id": "v1", "title": "a"})]),
                edges: None,
            }),
        );
        reduce(
            &mut state,
            &Action::new(
                ELEMENT_UPDATE_EDGELABELS,
                json!({"workspaceId": "w1", "vertexLabels": {"v1": ["knows"]}}),
            ),
        );
        reduce(
            &mut state,
            &update(&ElementUpdate {
                workspace_id: "w1".into(),
                vertices: Some(vec![json!({"id": "v1", "title": "b"})]),
                edges: None,
            }),
        );
        let v1 = &state.workspaces["w1"].vertices["v1"];
        assert_eq!(v1["title"], "b");
        assert_eq!(v1["edgeLabels"], json!(["knows"]));
    }

    #[test]
    fn tombstones_replace_records() {
        let mut state = ElementState::default();
        reduce(&mut state, &update_element("w1", json!({"id": "e1", "type": "edge"})));
        reduce(
            &mut state,
            &update(&ElementUpdate {
                workspace_id: "w1".into(),
                vertices: None,
                edges: Some(vec![tombstone("e1")]),
            }),
        );
        assert!(is_tombstone(&state.workspaces["w1"].edges["e1"]));
    }

    #[test]
    fn focus_is_serialized_beside_workspaces() {
        let mut state = ElementState::default();
        reduce(&mut state, &update_element("w1", json!({"id": "v1"})));
        reduce(&mut state, &set_focus(&["v1".to_owned()]));
        let encoded = serde_json::to_value(&state).unwrap();
        assert_eq!(encoded["focusing"], json!(["v1"]));
        assert_eq!(encoded["w1"]["vertices"]["v1"]["id"], "v1");
    }
}

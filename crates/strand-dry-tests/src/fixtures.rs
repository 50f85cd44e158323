// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! JSON builders for backend records.

use serde_json::{json, Value};

/// Vertex record as `/vertex/multiple` returns it.
pub fn vertex(id: &str) -> Value {
    json!({ "id": id, "type": "vertex", "properties": [] })
}

/// Edge record as `/edge/multiple` returns it.
pub fn edge(id: &str, out_vertex_id: &str, in_vertex_id: &str, label: &str) -> Value {
    json!({
        "id": id,
        "type": "edge",
        "label": label,
        "outVertexId": out_vertex_id,
        "inVertexId": in_vertex_id,
        "properties": [],
    })
}

/// Graph product entry for a vertex at `(x, y)`.
pub fn placed_vertex(id: &str, x: i64, y: i64) -> Value {
    json!({ "id": id, "type": "vertex", "pos": { "x": x, "y": y } })
}

/// Graph product with the given vertex ids at the origin and edge ids
/// indexed from zero.
pub fn graph_product(id: &str, workspace_id: &str, vertex_ids: &[&str], edge_ids: &[&str]) -> Value {
    let vertices: serde_json::Map<String, Value> = vertex_ids
        .iter()
        .map(|v| ((*v).to_owned(), placed_vertex(v, 0, 0)))
        .collect();
    let edges: serde_json::Map<String, Value> = edge_ids
        .iter()
        .enumerate()
        .map(|(index, e)| (index.to_string(), json!({ "edgeId": e })))
        .collect();
    json!({
        "id": id,
        "workspaceId": workspace_id,
        "kind": "org.visallo.web.product.graph.GraphWorkProduct",
        "title": id,
        "extendedData": {
            "vertices": vertices,
            "compoundNodes": {},
            "edges": edges,
        },
    })
}

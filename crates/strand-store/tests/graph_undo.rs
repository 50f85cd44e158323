// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph product edits and their undo/redo through the store.

mod common;

use serde_json::{json, Map, Value};
use strand_dry_tests::fixtures;
use strand_proto::Action;
use strand_store::graph::{self, PRODUCT_GRAPH_REMOVE_ELEMENTS};
use strand_store::product::{ElementSelection, PRODUCT_UPDATE};
use strand_store::{undo, workspace, Store};

fn load_product(store: &Store) {
    store
        .dispatch(Action::new(
            PRODUCT_UPDATE,
            json!({ "product": {
                "id": "p1",
                "workspaceId": "w1",
                "extendedData": {
                    "vertices": { "v1": { "id": "v1", "pos": { "x": 0, "y": 0 } } },
                    "compoundNodes": {},
                    "edges": { "0": { "edgeId": "e1" }, "1": { "edgeId": "e2" } },
                },
            }}),
        ))
        .unwrap();
}

fn extended(store: &Store) -> Map<String, Value> {
    store
        .state()
        .product
        .product("w1", "p1")
        .and_then(|product| product.extended_data.clone())
        .unwrap()
}

fn moves(entries: Value) -> Map<String, Value> {
    entries.as_object().cloned().unwrap()
}

#[tokio::test]
async fn move_then_undo_then_redo() {
    let h = common::harness();
    load_product(&h.store);
    h.transport.respond("POST /product", json!({}));

    graph::set_positions(
        &h.store,
        &h.transport,
        "p1",
        moves(json!({ "v1": { "pos": { "x": 10.4, "y": 20.6 } } })),
    )
    .await
    .unwrap();
    assert_eq!(extended(&h.store)["vertices"]["v1"]["pos"], json!({ "x": 10, "y": 21 }));
    let persisted = &h.transport.calls_to("POST /product")[0];
    assert_eq!(
        persisted.field("params").unwrap()["updateVertices"]["v1"]["pos"],
        json!({ "x": 10, "y": 21 })
    );

    h.store.dispatch(undo::undo(Some("w1"))).unwrap();
    assert_eq!(extended(&h.store)["vertices"]["v1"]["pos"], json!({ "x": 0, "y": 0 }));

    h.store.dispatch(undo::redo(Some("w1"))).unwrap();
    assert_eq!(extended(&h.store)["vertices"]["v1"]["pos"], json!({ "x": 10, "y": 21 }));
    assert_eq!(h.transport.calls_to("POST /product").len(), 1);
}

#[tokio::test]
async fn unscoped_undo_targets_the_current_workspace() {
    let h = common::harness();
    load_product(&h.store);
    h.transport.respond("POST /product", json!({}));

    graph::set_positions(
        &h.store,
        &h.transport,
        "p1",
        moves(json!({ "v1": { "pos": { "x": 10, "y": 20 } } })),
    )
    .await
    .unwrap();

    h.store.dispatch(undo::undo(None)).unwrap();
    assert_eq!(extended(&h.store)["vertices"]["v1"]["pos"], json!({ "x": 0, "y": 0 }));
    assert_eq!(h.store.state().undo_action_history.scope("w1").unwrap().redos.len(), 1);

    h.store.dispatch(undo::redo(None)).unwrap();
    assert_eq!(extended(&h.store)["vertices"]["v1"]["pos"], json!({ "x": 10, "y": 20 }));
}

#[tokio::test]
async fn undoing_an_added_vertex_removes_it() {
    let h = common::harness();
    load_product(&h.store);
    h.transport.respond("POST /product", json!({}));

    graph::set_positions(
        &h.store,
        &h.transport,
        "p1",
        moves(json!({ "v9": { "type": "vertex", "pos": { "x": 5, "y": 5 } } })),
    )
    .await
    .unwrap();
    assert_eq!(extended(&h.store)["vertices"]["v9"]["id"], "v9");

    h.store.dispatch(undo::undo(Some("w1"))).unwrap();
    let after = extended(&h.store);
    assert!(after["vertices"].get("v9").is_none());
    assert!(after["vertices"].get("v1").is_some());
}

#[tokio::test]
async fn undoing_a_removal_restores_vertices_and_edges() {
    let h = common::harness();
    load_product(&h.store);
    h.transport.respond("POST /product", json!({}));

    graph::remove_elements(
        &h.store,
        &h.transport,
        "p1",
        ElementSelection {
            vertex_ids: Some(vec!["v1".into()]),
            edge_ids: Some(vec!["e1".into()]),
            collapsed_node_ids: None,
        },
    )
    .await
    .unwrap();
    let removed = extended(&h.store);
    assert!(removed["vertices"].get("v1").is_none());
    assert_eq!(removed["edges"], json!({ "1": { "edgeId": "e2" } }));
    let persisted = &h.transport.calls_to("POST /product")[0];
    assert_eq!(
        persisted.field("params"),
        Some(&json!({ "removeVertices": ["v1"] }))
    );

    h.store.dispatch(undo::undo(Some("w1"))).unwrap();
    let restored = extended(&h.store);
    assert_eq!(restored["vertices"]["v1"]["pos"], json!({ "x": 0, "y": 0 }));
    let edge_ids: Vec<&str> = restored["edges"]
        .as_object()
        .unwrap()
        .values()
        .filter_map(|edge| edge["edgeId"].as_str())
        .collect();
    assert!(edge_ids.contains(&"e1"));
    assert!(edge_ids.contains(&"e2"));
}

#[tokio::test]
async fn read_only_workspaces_ignore_edits() {
    let h = common::harness();
    load_product(&h.store);
    h.store
        .dispatch(workspace::update(json!({ "workspaceId": "w1", "editable": false })))
        .unwrap();

    graph::set_positions(
        &h.store,
        &h.transport,
        "p1",
        moves(json!({ "v1": { "pos": { "x": 99, "y": 99 } } })),
    )
    .await
    .unwrap();

    assert_eq!(extended(&h.store)["vertices"]["v1"]["pos"], json!({ "x": 0, "y": 0 }));
    assert!(h.transport.calls().is_empty());
    assert!(h.store.state().undo_action_history.scope("w1").is_none());
}

#[tokio::test]
async fn edge_indices_are_never_reused() {
    let h = common::harness();
    load_product(&h.store);

    h.store
        .dispatch(graph::add_edge_ids(
            "w1",
            "p1",
            vec![json!({ "edgeId": "e2" }), json!({ "edgeId": "e3" })],
        ))
        .unwrap();
    assert_eq!(extended(&h.store)["edges"]["2"], json!({ "edgeId": "e3" }));

    h.store
        .dispatch(Action::new(
            PRODUCT_GRAPH_REMOVE_ELEMENTS,
            json!({ "workspaceId": "w1", "productId": "p1", "elements": { "edgeIds": ["e3"] } }),
        ))
        .unwrap();
    h.store
        .dispatch(graph::add_edge_ids("w1", "p1", vec![json!({ "edgeId": "e4" })]))
        .unwrap();

    let edges = extended(&h.store)["edges"].clone();
    assert!(edges.get("2").is_none());
    assert_eq!(edges["3"], json!({ "edgeId": "e4" }));
}

#[tokio::test]
async fn ghosts_come_and_go() {
    let h = common::harness();
    h.store
        .dispatch(graph::add_ghosts(
            &["v1".to_owned(), "v2".to_owned()],
            json!({ "x": 1, "y": 2 }),
        ))
        .unwrap();
    h.store.dispatch(graph::remove_ghost("v1")).unwrap();
    let ghosts = h.store.state().graph.animating_ghosts.clone();
    assert_eq!(ghosts.len(), 1);
    assert_eq!(ghosts["v2"], json!({ "x": 1, "y": 2 }));
}

fn load_pair(store: &Store) {
    store
        .dispatch(Action::new(
            PRODUCT_UPDATE,
            json!({ "product": {
                "id": "p1",
                "workspaceId": "w1",
                "extendedData": {
                    "vertices": {
                        "v1": { "id": "v1", "parent": "root", "pos": { "x": 0, "y": 0 } },
                        "v2": { "id": "v2", "parent": "root", "pos": { "x": 100, "y": 0 } },
                    },
                    "compoundNodes": {},
                    "edges": {},
                },
            }}),
        ))
        .unwrap();
}

#[tokio::test]
async fn collapse_undo_redo_round_trip() {
    let h = common::harness();
    load_pair(&h.store);
    h.transport.respond("POST /product", json!({}));

    let node_id = graph::collapse_nodes(
        &h.store,
        &h.transport,
        "p1",
        vec!["v1".into(), "v2".into()],
        json!({ "x": 50, "y": 0 }),
        None,
    )
    .await
    .unwrap()
    .unwrap();
    let collapsed = extended(&h.store);
    assert_eq!(collapsed["compoundNodes"][&node_id]["children"], json!(["v1", "v2"]));
    assert_eq!(collapsed["vertices"]["v1"]["parent"], json!(node_id));
    let persisted = &h.transport.calls_to("POST /product")[0];
    assert_eq!(
        persisted.field("params").unwrap()["updateVertices"][&node_id]["children"],
        json!(["v1", "v2"])
    );

    h.store.dispatch(undo::undo(None)).unwrap();
    let undone = extended(&h.store);
    assert_eq!(undone["compoundNodes"], json!({}));
    assert_eq!(undone["vertices"]["v1"]["parent"], "root");

    h.store.dispatch(undo::redo(None)).unwrap();
    assert_eq!(extended(&h.store)["vertices"]["v2"]["parent"], json!(node_id));
}

#[tokio::test]
async fn uncollapse_is_undoable() {
    let h = common::harness();
    load_pair(&h.store);
    h.transport.respond("POST /product", json!({}));
    let node_id = graph::collapse_nodes(
        &h.store,
        &h.transport,
        "p1",
        vec!["v1".into(), "v2".into()],
        json!({ "x": 50, "y": 0 }),
        None,
    )
    .await
    .unwrap()
    .unwrap();

    graph::uncollapse_nodes(&h.store, &h.transport, "p1", &node_id)
        .await
        .unwrap();
    assert!(extended(&h.store)["compoundNodes"].get(&node_id).is_none());
    let removal = &h.transport.calls_to("POST /product")[1];
    assert_eq!(removal.field("params"), Some(&json!({ "removeVertices": [node_id] })));

    h.store.dispatch(undo::undo(Some("w1"))).unwrap();
    let refolded = extended(&h.store);
    assert_eq!(refolded["compoundNodes"][&node_id]["pos"], json!({ "x": 50, "y": 0 }));
    assert_eq!(refolded["vertices"]["v1"]["parent"], json!(node_id));
}

#[tokio::test]
async fn collapsing_a_single_entry_does_nothing() {
    let h = common::harness();
    load_pair(&h.store);
    let created = graph::collapse_nodes(
        &h.store,
        &h.transport,
        "p1",
        vec!["v1".into()],
        json!({ "x": 0, "y": 0 }),
        None,
    )
    .await
    .unwrap();
    assert!(created.is_none());
    assert!(h.transport.calls().is_empty());
}

#[tokio::test]
async fn snap_moves_only_off_grid_vertices() {
    let h = common::harness();
    load_pair(&h.store);
    h.transport.respond("POST /product", json!({}));

    graph::snap_to_grid(&h.store, &h.transport, Some("p1")).await.unwrap();
    let snapped = extended(&h.store);
    assert_eq!(snapped["vertices"]["v1"]["pos"], json!({ "x": 0, "y": 0 }));
    assert_eq!(snapped["vertices"]["v2"]["pos"], json!({ "x": 175, "y": 0 }));
    let persisted = &h.transport.calls_to("POST /product")[0];
    let moved = persisted.field("params").unwrap()["updateVertices"].clone();
    assert!(moved.get("v1").is_none());

    h.store.dispatch(undo::undo(None)).unwrap();
    assert_eq!(extended(&h.store)["vertices"]["v2"]["pos"], json!({ "x": 100, "y": 0 }));
}

#[tokio::test]
async fn dropped_edges_bring_their_endpoints() {
    let h = common::harness();
    load_pair(&h.store);
    h.transport
        .respond(
            "POST /edge/multiple",
            json!({ "edges": [fixtures::edge("e1", "v1", "v7", "knows")] }),
        )
        .respond("POST /product", json!({}));

    graph::drop_elements(
        &h.store,
        &h.transport,
        "p1",
        ElementSelection {
            vertex_ids: Some(vec!["v8".into(), "v7".into()]),
            edge_ids: Some(vec!["e1".into()]),
            collapsed_node_ids: None,
        },
        Some((500, 500)),
    )
    .await
    .unwrap();

    let vertices = extended(&h.store)["vertices"].clone();
    assert_eq!(vertices["v7"]["pos"], json!({ "x": 500, "y": 500 }));
    assert_eq!(vertices["v8"]["pos"], json!({ "x": 675, "y": 500 }));
    assert_eq!(vertices["v1"]["pos"], json!({ "x": 0, "y": 0 }));
    let state = h.store.state();
    assert_eq!(state.product.workspaces["w1"].selected.as_deref(), Some("p1"));
}

#[tokio::test]
async fn related_vertices_land_below_the_graph() {
    let h = common::harness();
    load_pair(&h.store);
    h.transport.respond("POST /product", json!({}));

    let ids = graph::add_related(
        &h.store,
        &h.transport,
        "p1",
        vec![fixtures::vertex("v1"), fixtures::vertex("v3")],
    )
    .await
    .unwrap();
    assert_eq!(ids, vec!["v1", "v3"]);

    let vertices = extended(&h.store)["vertices"].clone();
    assert_eq!(vertices["v3"]["pos"], json!({ "x": 0, "y": 75 }));
    let cached = h.store.state();
    assert!(cached.element.workspace("w1").is_some());
}

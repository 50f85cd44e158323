// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Socket frames through the running worker: echo suppression, plugin
//! handlers, rebroadcasts, store effects.

mod common;

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use strand_dry_tests::{fixtures, FakeTransport};
use strand_proto::{MainMessage, SessionContext, WorkerMessage};
use strand_registry::ExtensionRegistry;
use strand_worker::{Reaction, SocketHandler, SOCKET_POINT};
use tokio::sync::mpsc;

use common::{next_where, start};

fn recording_handler(registry: &ExtensionRegistry, name: &str) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    registry
        .register(
            &SOCKET_POINT,
            SocketHandler::new(name, move |data: &Value| {
                log.lock().unwrap().push(data.clone());
                Vec::new()
            }),
        )
        .unwrap();
    seen
}

fn socket(body: &Value) -> MainMessage {
    MainMessage::SocketMessage {
        body: body.to_string(),
    }
}

async fn rebroadcast(rx: &mut mpsc::UnboundedReceiver<WorkerMessage>) -> (String, Value) {
    match next_where(rx, |m| matches!(m, WorkerMessage::Rebroadcast { .. })).await {
        WorkerMessage::Rebroadcast { event_name, data } => (event_name, data),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn own_echoes_never_reach_any_handler() {
    let registry = Arc::new(ExtensionRegistry::new());
    let seen = recording_handler(&registry, "propertyChange");
    let transport = FakeTransport::new();
    let mut channels = start(&transport, registry).await;
    channels
        .to_worker
        .send(MainMessage::UpdateContext(SessionContext {
            socket_source_guid: Some("me".into()),
            ..SessionContext::default()
        }))
        .unwrap();

    channels
        .to_worker
        .send(socket(&json!({
            "type": "propertyChange",
            "data": {"graphVertexId": "v0"},
            "sourceGuid": "me"
        })))
        .unwrap();
    channels
        .to_worker
        .send(socket(&json!({
            "type": "batch",
            "data": [
                {"type": "propertyChange", "data": {"graphVertexId": "v1"}, "sourceGuid": "me"},
                {"type": "propertyChange", "data": {"graphVertexId": "v2"}, "sourceGuid": "them"},
                {"type": "notification", "data": {"id": "n1"}}
            ]
        })))
        .unwrap();

    let (event, data) = rebroadcast(&mut channels.from_worker).await;
    assert_eq!(event, "notificationActive");
    assert_eq!(data, json!({"id": "n1"}));
    assert_eq!(*seen.lock().unwrap(), vec![json!({"graphVertexId": "v2"})]);
}

#[tokio::test]
async fn plugins_handle_unknown_types_and_share_known_ones() {
    let registry = Arc::new(ExtensionRegistry::new());
    let custom = recording_handler(&registry, "myPluginEvent");
    let shared = recording_handler(&registry, "sessionExpiration");
    registry
        .register(
            &SOCKET_POINT,
            SocketHandler::new("myPluginEvent", |data: &Value| {
                vec![Reaction::Rebroadcast {
                    event_name: "pluginSaw".into(),
                    data: data.clone(),
                }]
            }),
        )
        .unwrap();
    let mut channels = start(&FakeTransport::new(), registry).await;

    channels
        .to_worker
        .send(socket(&json!({"type": "myPluginEvent", "data": {"n": 1}})))
        .unwrap();
    assert_eq!(
        rebroadcast(&mut channels.from_worker).await,
        ("pluginSaw".to_owned(), json!({"n": 1}))
    );

    channels
        .to_worker
        .send(socket(&json!({"type": "sessionExpiration"})))
        .unwrap();
    assert_eq!(
        rebroadcast(&mut channels.from_worker).await,
        ("sessionExpiration".to_owned(), Value::Null)
    );
    assert_eq!(*custom.lock().unwrap(), vec![json!({"n": 1})]);
    assert_eq!(*shared.lock().unwrap(), vec![Value::Null]);
}

#[tokio::test]
async fn unhandled_types_are_not_fatal() {
    let mut channels = start(&FakeTransport::new(), Arc::new(ExtensionRegistry::new())).await;

    channels
        .to_worker
        .send(socket(&json!({"type": "somethingNew", "data": {}})))
        .unwrap();
    channels
        .to_worker
        .send(MainMessage::SocketMessage {
            body: "not json".into(),
        })
        .unwrap();
    channels
        .to_worker
        .send(socket(&json!({"type": "longRunningProcessDeleted", "data": "lrp1"})))
        .unwrap();

    assert_eq!(
        rebroadcast(&mut channels.from_worker).await,
        (
            "longRunningProcessDeleted".to_owned(),
            json!({"processId": "lrp1"})
        )
    );
}

#[tokio::test]
async fn workspace_messages_update_the_store() {
    let mut channels = start(&FakeTransport::new(), Arc::new(ExtensionRegistry::new())).await;

    channels
        .to_worker
        .send(socket(&json!({
            "type": "workspaceChange",
            "data": {"workspaceId": "w1", "title": "Case", "editable": true}
        })))
        .unwrap();

    match next_where(&mut channels.from_worker, |m| {
        matches!(m, WorkerMessage::StoreAction { .. })
    })
    .await
    {
        WorkerMessage::StoreAction { action } => {
            let ops = action.payload.to_string();
            assert!(ops.contains("/workspace/byId/w1"), "{ops}");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn workspace_change_without_data_uses_top_level_fields() {
    let transport = FakeTransport::new();
    let mut channels = start(&transport, Arc::new(ExtensionRegistry::new())).await;
    channels
        .to_worker
        .send(socket(&json!({
            "type": "workspaceChange",
            "workspaceId": "w2",
            "title": "Flat",
            "editable": true
        })))
        .unwrap();

    match next_where(&mut channels.from_worker, |m| {
        matches!(m, WorkerMessage::StoreAction { .. })
    })
    .await
    {
        WorkerMessage::StoreAction { action } => {
            let ops = action.payload.to_string();
            assert!(ops.contains("/workspace/byId/w2"), "{ops}");
            assert!(ops.contains("Flat"), "{ops}");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn edge_deletion_confirms_through_the_backend() {
    let transport = FakeTransport::new();
    transport
        .respond(
            "POST /edge/multiple",
            json!({"edges": [fixtures::edge("e1", "v1", "v2", "knows")]}),
        )
        .respond("POST /edge/exists", json!({"exists": {"e1": false}}));
    let mut channels = start(&transport, Arc::new(ExtensionRegistry::new())).await;
    let has = |needle: &'static str| {
        move |m: &WorkerMessage| match m {
            WorkerMessage::StoreAction { action } => action.payload.to_string().contains(needle),
            _ => false,
        }
    };

    channels
        .to_worker
        .send(MainMessage::StoreAction {
            action: strand_proto::Action::new(
                "element.get",
                json!({"workspaceId": "w1", "edgeIds": ["e1"]}),
            ),
        })
        .unwrap();
    next_where(&mut channels.from_worker, has("knows")).await;

    channels
        .to_worker
        .send(socket(&json!({"type": "edgeDeletion", "data": {"edgeId": "e1"}})))
        .unwrap();
    next_where(&mut channels.from_worker, has("_DELETED")).await;

    let checks = transport.calls_to("POST /edge/exists");
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].field("edgeIds"), Some(&json!(["e1"])));
}

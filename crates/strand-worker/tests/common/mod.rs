// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use strand_dry_tests::FakeTransport;
use strand_proto::{DataRequest, MainMessage, RequestId, WorkerMessage};
use strand_registry::ExtensionRegistry;
use strand_worker::{spawn, WorkerChannels, WorkerConfig};
use tokio::sync::mpsc;

/// Worker over `transport` and `registry`, with `StoreInit` already consumed.
pub async fn start(transport: &FakeTransport, registry: Arc<ExtensionRegistry>) -> WorkerChannels {
    let mut channels = spawn(Arc::new(transport.clone()), registry, WorkerConfig::default()).unwrap();
    match next(&mut channels.from_worker).await {
        WorkerMessage::StoreInit { .. } => {}
        other => panic!("expected StoreInit first, got {other:?}"),
    }
    channels
}

/// Next worker message; fails the test after a second of silence.
pub async fn next(rx: &mut mpsc::UnboundedReceiver<WorkerMessage>) -> WorkerMessage {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("worker went quiet")
        .expect("worker channel closed")
}

/// Skip messages until one satisfies `wanted`.
pub async fn next_where<F>(rx: &mut mpsc::UnboundedReceiver<WorkerMessage>, wanted: F) -> WorkerMessage
where
    F: Fn(&WorkerMessage) -> bool,
{
    loop {
        let message = next(rx).await;
        if wanted(&message) {
            return message;
        }
    }
}

pub fn request(request_id: RequestId, service: &str, method: &str, args: Vec<serde_json::Value>) -> MainMessage {
    MainMessage::DataRequest(DataRequest {
        request_id,
        service: service.to_owned(),
        method: method.to_owned(),
        args,
    })
}

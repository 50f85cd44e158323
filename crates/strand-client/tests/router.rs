// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request router against a hand-driven worker channel: timeouts, late
//! responses, progress, cancellation.

use std::time::Duration;

use serde_json::json;
use strand_client::{RequestError, RequestRouter};
use strand_proto::{DataResponse, MainMessage, WorkerMessage};
use tokio::sync::mpsc;

fn router() -> (RequestRouter, mpsc::UnboundedReceiver<MainMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RequestRouter::new(tx, Duration::from_secs(4)), rx)
}

#[tokio::test(start_paused = true)]
async fn unanswered_requests_time_out_after_four_seconds() {
    let (router, mut worker) = router();
    let pending = router.request("vertex", "search", vec![json!({"q": "x"})]).unwrap();
    assert!(matches!(worker.recv().await, Some(MainMessage::DataRequest(_))));

    let started = tokio::time::Instant::now();
    let result = pending.await;
    assert_eq!(
        result,
        Err(RequestError::Timeout {
            service: "vertex".into(),
            method: "search".into(),
        })
    );
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert_eq!(router.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn late_responses_are_dropped() {
    let (router, _worker) = router();
    let pending = router.request("product", "all", Vec::new()).unwrap();
    let id = pending.request_id();
    assert!(matches!(pending.await, Err(RequestError::Timeout { .. })));

    assert!(router.handle(&WorkerMessage::DataRequestCompleted(DataResponse::ok(
        id,
        json!("late")
    ))));
    assert_eq!(router.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn acknowledged_requests_are_not_timed_out() {
    let (router, _worker) = router();
    let pending = router.request("workspace", "all", Vec::new()).unwrap();
    let id = pending.request_id();
    router.handle(&WorkerMessage::DataRequestStarted { request_id: id });

    let waiter = tokio::spawn(pending);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!waiter.is_finished());

    router.handle(&WorkerMessage::DataRequestCompleted(DataResponse::ok(
        id,
        json!({"workspaces": []}),
    )));
    assert_eq!(waiter.await.unwrap(), Ok(json!({"workspaces": []})));
}

#[tokio::test]
async fn failures_keep_their_shape() {
    let (router, _worker) = router();
    let text = router.request("a", "b", Vec::new()).unwrap();
    let body = router.request("a", "b", Vec::new()).unwrap();
    router.handle(&WorkerMessage::DataRequestCompleted(DataResponse::err(
        text.request_id(),
        json!("no service named a"),
    )));
    router.handle(&WorkerMessage::DataRequestCompleted(DataResponse::err(
        body.request_id(),
        json!({"status": 403, "statusText": "Forbidden"}),
    )));
    assert_eq!(
        text.await,
        Err(RequestError::Handler("no service named a".into()))
    );
    assert_eq!(
        body.await,
        Err(RequestError::Remote(json!({"status": 403, "statusText": "Forbidden"})))
    );
}

#[tokio::test]
async fn progress_is_observable_before_completion() {
    let (router, _worker) = router();
    let pending = router.request("vertex", "upload", Vec::new()).unwrap();
    let mut progress = pending.progress();
    router.handle(&WorkerMessage::DataRequestProgress {
        request_id: pending.request_id(),
        progress: 0.5,
    });
    progress.changed().await.unwrap();
    assert!((*progress.borrow() - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn cancelling_tells_the_worker_and_resolves_cancelled() {
    let (router, mut worker) = router();
    let mut pending = router.request("vertex", "search", Vec::new()).unwrap();
    let id = pending.request_id();
    worker.recv().await.unwrap();

    pending.cancel();
    assert_eq!(
        worker.recv().await,
        Some(MainMessage::DataRequestCancel { request_id: id })
    );
    assert_eq!(pending.await, Err(RequestError::Cancelled));
    assert_eq!(router.pending_count(), 0);
}

#[tokio::test]
async fn dropping_a_pending_request_cancels_it() {
    let (router, mut worker) = router();
    let pending = router.request("vertex", "search", Vec::new()).unwrap();
    let id = pending.request_id();
    worker.recv().await.unwrap();
    drop(pending);
    assert_eq!(
        worker.recv().await,
        Some(MainMessage::DataRequestCancel { request_id: id })
    );
}

#[tokio::test]
async fn settled_requests_send_no_cancel() {
    let (router, mut worker) = router();
    let pending = router.request("vertex", "search", Vec::new()).unwrap();
    worker.recv().await.unwrap();
    router.handle(&WorkerMessage::DataRequestCompleted(DataResponse::ok(
        pending.request_id(),
        json!([]),
    )));
    assert_eq!(pending.await, Ok(json!([])));
    assert!(worker.try_recv().is_err());
}

#[tokio::test]
async fn disconnect_fails_everything_pending() {
    let (router, _worker) = router();
    let a = router.request("a", "b", Vec::new()).unwrap();
    let b = router.request("c", "d", Vec::new()).unwrap();
    router.disconnect();
    assert_eq!(a.await, Err(RequestError::Disconnected));
    assert_eq!(b.await, Err(RequestError::Disconnected));
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request router.
//!
//! Each request gets the next id, a reply slot, a progress watch and a
//! timeout timer. The worker's `DataRequestStarted` disarms the timer, so
//! only requests nobody picked up fail with [`RequestError::Timeout`]. Once a
//! request is settled or timed out its entry is gone; anything the worker
//! sends for it later is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use strand_proto::{DataRequest, DataResponse, MainMessage, RequestId, WorkerMessage};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::RequestError;

type Reply = Result<Value, RequestError>;

struct Entry {
    service: String,
    method: String,
    reply: oneshot::Sender<Reply>,
    progress: watch::Sender<f64>,
    timer: Option<JoinHandle<()>>,
}

impl Entry {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn settle(mut self, reply: Reply) {
        self.disarm();
        if self.reply.send(reply).is_err() {
            debug!(service = %self.service, method = %self.method, "caller gone before settlement");
        }
    }
}

struct Inner {
    to_worker: mpsc::UnboundedSender<MainMessage>,
    timeout: Duration,
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, Entry>>,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashMap<RequestId, Entry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expire(&self, request_id: RequestId) {
        let removed = self.pending().remove(&request_id);
        let Some(entry) = removed else {
            return;
        };
        error!(
            request_id,
            service = %entry.service,
            method = %entry.method,
            "data request went unhandled"
        );
        let reply = Err(RequestError::Timeout {
            service: entry.service.clone(),
            method: entry.method.clone(),
        });
        entry.settle(reply);
    }

    fn cancel(&self, request_id: RequestId) {
        let removed = self.pending().remove(&request_id);
        let Some(mut entry) = removed else {
            return;
        };
        entry.disarm();
        if self
            .to_worker
            .send(MainMessage::DataRequestCancel { request_id })
            .is_err()
        {
            debug!(request_id, "worker gone; cancel not sent");
        }
    }
}

/// Correlates data requests with worker responses.
#[derive(Clone)]
pub struct RequestRouter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRouter")
            .field("timeout", &self.inner.timeout)
            .field("pending", &self.inner.pending().len())
            .finish_non_exhaustive()
    }
}

impl RequestRouter {
    /// Router sending to `to_worker`; unacknowledged requests fail after `timeout`.
    pub fn new(to_worker: mpsc::UnboundedSender<MainMessage>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                to_worker,
                timeout,
                next_id: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Number of unsettled requests.
    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    /// Issue `service.method(args…)`.
    ///
    /// Empty names are rejected here, before anything is sent. Must be
    /// called inside a tokio runtime (the timeout timer is a task).
    pub fn request(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<PendingRequest, RequestError> {
        if service.is_empty() {
            return Err(RequestError::Invalid("service is required".into()));
        }
        if method.is_empty() {
            return Err(RequestError::Invalid("method is required".into()));
        }
        let request_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (reply, reply_rx) = oneshot::channel();
        let (progress, progress_rx) = watch::channel(0.0);

        self.inner.pending().insert(
            request_id,
            Entry {
                service: service.to_owned(),
                method: method.to_owned(),
                reply,
                progress,
                timer: None,
            },
        );
        let weak = Arc::downgrade(&self.inner);
        let timeout = self.inner.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(request_id);
            }
        });
        let mut pending = self.inner.pending();
        if let Some(entry) = pending.get_mut(&request_id) {
            entry.timer = Some(timer);
        }
        drop(pending);

        let sent = self
            .inner
            .to_worker
            .send(MainMessage::DataRequest(DataRequest {
                request_id,
                service: service.to_owned(),
                method: method.to_owned(),
                args,
            }));
        if sent.is_err() {
            let removed = self.inner.pending().remove(&request_id);
            if let Some(mut entry) = removed {
                entry.disarm();
            }
            return Err(RequestError::Disconnected);
        }
        debug!(request_id, service, method, "data request sent");
        Ok(PendingRequest {
            request_id,
            reply: reply_rx,
            progress: progress_rx,
            router: Arc::downgrade(&self.inner),
            state: Settlement::Waiting,
        })
    }

    /// Feed a worker message. Returns `false` for messages that are not
    /// about data requests.
    pub fn handle(&self, message: &WorkerMessage) -> bool {
        match message {
            WorkerMessage::DataRequestStarted { request_id } => {
                let mut pending = self.inner.pending();
                if let Some(entry) = pending.get_mut(request_id) {
                    entry.disarm();
                }
            }
            WorkerMessage::DataRequestProgress {
                request_id,
                progress,
            } => {
                let pending = self.inner.pending();
                if let Some(entry) = pending.get(request_id) {
                    entry.progress.send_replace(*progress);
                }
            }
            WorkerMessage::DataRequestCompleted(response) => self.complete(response.clone()),
            _ => return false,
        }
        true
    }

    fn complete(&self, response: DataResponse) {
        let request_id = response.request_id;
        let removed = self.inner.pending().remove(&request_id);
        let Some(entry) = removed else {
            debug!(request_id, "late data response dropped");
            return;
        };
        entry.settle(response.into_result().map_err(RequestError::from_wire));
    }

    /// Fail every unsettled request with [`RequestError::Disconnected`].
    pub fn disconnect(&self) {
        let drained: Vec<Entry> = self.inner.pending().drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            entry.settle(Err(RequestError::Disconnected));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Waiting,
    Cancelled,
    Done,
}

/// Future of one data request.
///
/// Dropping it before it resolves cancels the request.
#[derive(Debug)]
pub struct PendingRequest {
    request_id: RequestId,
    reply: oneshot::Receiver<Reply>,
    progress: watch::Receiver<f64>,
    router: Weak<Inner>,
    state: Settlement,
}

impl PendingRequest {
    /// Id the request travels under.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Progress reported so far, in `0.0..1.0`.
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress.clone()
    }

    /// Stop waiting. The worker is told to suppress the completion; the
    /// future then resolves to [`RequestError::Cancelled`].
    pub fn cancel(&mut self) {
        if self.state != Settlement::Waiting {
            return;
        }
        self.state = Settlement::Cancelled;
        if let Some(router) = self.router.upgrade() {
            router.cancel(self.request_id);
        }
    }
}

impl Future for PendingRequest {
    type Output = Reply;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.state {
            Settlement::Cancelled => return Poll::Ready(Err(RequestError::Cancelled)),
            Settlement::Done => return Poll::Ready(Err(RequestError::Disconnected)),
            Settlement::Waiting => {}
        }
        let reply = match Pin::new(&mut this.reply).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(reply)) => reply,
            Poll::Ready(Err(_)) => Err(RequestError::Disconnected),
        };
        this.state = Settlement::Done;
        Poll::Ready(reply)
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.cancel();
    }
}

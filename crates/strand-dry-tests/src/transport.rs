// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted [`Transport`] fake.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use strand_proto::SessionContext;
use strand_transport::{AjaxError, AjaxRequest, AjaxResponse, Params, Transport};

type Scripted = Result<Value, AjaxError>;

/// One call the fake received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// `METHOD url`.
    pub route: String,
    /// Parameters as sent.
    pub params: Params,
}

impl RecordedCall {
    /// A named field of the call's parameters.
    pub fn field(&self, key: &str) -> Option<&Value> {
        match &self.params {
            Params::Fields(fields) | Params::Upload { fields, .. } => fields.get(key),
            Params::None => None,
        }
    }
}

#[derive(Default)]
struct Script {
    once: HashMap<String, VecDeque<Scripted>>,
    always: HashMap<String, Scripted>,
    delays: HashMap<String, Duration>,
    calls: Vec<RecordedCall>,
    contexts: Vec<SessionContext>,
}

/// Answers requests from responses scripted per `METHOD url`.
///
/// One-shot responses are used first, in order, then the standing response.
/// Unscripted routes fail with a 404 status error.
#[derive(Clone, Default)]
pub struct FakeTransport {
    script: Arc<Mutex<Script>>,
}

impl FakeTransport {
    /// Fake with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer every call to `route` with `body`.
    pub fn respond(&self, route: &str, body: Value) -> &Self {
        self.lock().always.insert(route.to_owned(), Ok(body));
        self
    }

    /// Answer the next call to `route` with `body`.
    pub fn respond_once(&self, route: &str, body: Value) -> &Self {
        self.lock()
            .once
            .entry(route.to_owned())
            .or_default()
            .push_back(Ok(body));
        self
    }

    /// Fail every call to `route` with `error`.
    pub fn fail(&self, route: &str, error: AjaxError) -> &Self {
        self.lock().always.insert(route.to_owned(), Err(error));
        self
    }

    /// Hold responses to `route` for `delay`.
    pub fn delay(&self, route: &str, delay: Duration) -> &Self {
        self.lock().delays.insert(route.to_owned(), delay);
        self
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Calls made to `route`.
    pub fn calls_to(&self, route: &str) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.route == route)
            .cloned()
            .collect()
    }

    /// Session contexts pushed through [`Transport::update_context`].
    pub fn contexts(&self) -> Vec<SessionContext> {
        self.lock().contexts.clone()
    }
}

impl Transport for FakeTransport {
    fn send(&self, request: AjaxRequest) -> BoxFuture<'_, Result<AjaxResponse, AjaxError>> {
        let route = request.route();
        let (answer, delay) = {
            let mut script = self.lock();
            script.calls.push(RecordedCall {
                route: route.clone(),
                params: request.params.clone(),
            });
            let answer = script
                .once
                .get_mut(&route)
                .and_then(VecDeque::pop_front)
                .or_else(|| script.always.get(&route).cloned())
                .unwrap_or_else(|| {
                    Err(AjaxError::Status {
                        status: 404,
                        status_text: "Not Found".to_owned(),
                    })
                });
            (answer, script.delays.get(&route).copied())
        };
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            answer.map(AjaxResponse::Json)
        })
    }

    fn update_context(&self, context: SessionContext) {
        self.lock().contexts.push(context);
    }
}

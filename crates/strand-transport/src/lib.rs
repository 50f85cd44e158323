// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! HTTP transport used by the strand worker.
//!
//! [`Transport`] is the port the worker's services talk to; [`HttpTransport`]
//! is the reqwest adapter. Tests swap in a scripted fake.

pub mod error;
pub mod http;
pub mod method;
pub mod params;

pub use error::AjaxError;
pub use http::{HttpTransport, ResponseObserver};
pub use method::AjaxMethod;
pub use params::{FileUpload, Params};

use futures_util::future::BoxFuture;
use reqwest::Method;
use serde_json::{Map, Value};
use strand_proto::SessionContext;
use tokio::sync::mpsc;

/// Receives upload progress fractions in `0.0..1.0`.
pub type ProgressSender = mpsc::UnboundedSender<f64>;

/// Server-side failure injection, sent as request headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugOptions {
    /// Ask the server to fail with this message.
    pub error: Option<String>,
    /// Ask the server to fail with this JSON body.
    pub error_json: Option<Value>,
    /// Ask the server to delay its response.
    pub delay_ms: Option<u64>,
}

/// One Ajax call.
#[derive(Debug, Clone)]
pub struct AjaxRequest {
    /// Verb and response mode.
    pub method: AjaxMethod,
    /// Path relative to the backend base URL (e.g. `/vertex/multiple`).
    pub url: String,
    /// Parameters.
    pub params: Params,
    /// Optional failure injection.
    pub debug: Option<DebugOptions>,
    /// Upload progress sink.
    pub progress: Option<ProgressSender>,
}

impl AjaxRequest {
    /// Request without parameters.
    pub fn new(method: AjaxMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Params::None,
            debug: None,
            progress: None,
        }
    }

    /// Parse `method` (`GET`, `POST->HTML`, …) and build a request.
    pub fn parse(method: &str, url: impl Into<String>) -> Result<Self, AjaxError> {
        Ok(Self::new(method.parse()?, url))
    }

    /// JSON `GET`.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(AjaxMethod::json(Method::GET), url)
    }

    /// JSON `POST`.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(AjaxMethod::json(Method::POST), url)
    }

    /// JSON `DELETE`.
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(AjaxMethod::json(Method::DELETE), url)
    }

    /// Attach field parameters.
    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.params = Params::Fields(fields);
        self
    }

    /// Attach parameters.
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Attach failure injection.
    pub fn with_debug(mut self, debug: DebugOptions) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Report upload progress to `progress`.
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    /// `METHOD url` key, as used in logs and by test fakes.
    pub fn route(&self) -> String {
        format!("{} {}", self.method.verb, self.url)
    }
}

/// Successful response body.
#[derive(Debug, Clone, PartialEq)]
pub enum AjaxResponse {
    /// Parsed JSON (default mode).
    Json(Value),
    /// Raw text (`->HTML` mode).
    Text(String),
}

impl AjaxResponse {
    /// Body as JSON; text bodies become a JSON string.
    pub fn into_json(self) -> Value {
        match self {
            Self::Json(value) => value,
            Self::Text(text) => Value::String(text),
        }
    }
}

/// Port through which the worker reaches the backend.
pub trait Transport: Send + Sync {
    /// Issue `request`. Dropping the future abandons the call.
    fn send(&self, request: AjaxRequest) -> BoxFuture<'_, Result<AjaxResponse, AjaxError>>;

    /// Session values pushed from the main thread. Transports that stamp no
    /// headers ignore them.
    fn update_context(&self, _context: SessionContext) {}
}

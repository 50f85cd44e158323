// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! reqwest-backed [`Transport`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;
use strand_proto::SessionContext;
use tracing::{debug, warn};

use crate::params::field_text;
use crate::{AjaxError, AjaxMethod, AjaxRequest, AjaxResponse, Params, ProgressSender, Transport};

/// Header carrying the current workspace id.
pub const WORKSPACE_HEADER: &str = "Strand-Workspace-Id";
/// Header carrying the CSRF token on state-changing requests.
pub const CSRF_HEADER: &str = "Strand-CSRF-Token";
/// Header carrying this client's socket guid on state-changing requests.
pub const SOURCE_GUID_HEADER: &str = "Strand-Source-Guid";
/// Header enabling server-side graph tracing.
pub const TRACE_HEADER: &str = "graphTraceEnable";
/// Debug header: fail with a message.
pub const DEBUG_ERROR_HEADER: &str = "Strand-Request-Error";
/// Debug header: fail with a JSON body.
pub const DEBUG_ERROR_JSON_HEADER: &str = "Strand-Request-Error-Json";
/// Debug header: delay the response.
pub const DEBUG_DELAY_HEADER: &str = "Strand-Request-Delay-Millis";

const UPLOAD_CHUNK: usize = 16 * 1024;

/// Sees every successful JSON response (e.g. to warm a cache).
pub trait ResponseObserver: Send + Sync {
    /// Called after a 200 response parsed as JSON.
    fn observe(&self, method: &AjaxMethod, url: &str, body: &Value);
}

/// Session headers for a request, in the order they are applied.
pub fn session_headers(
    context: &SessionContext,
    method: &AjaxMethod,
    params: &Params,
) -> Vec<(&'static str, String)> {
    let mut headers = Vec::new();
    let mutating = method.verb != Method::GET;
    if let Some(workspace) = &context.current_workspace_id {
        if !params.has_workspace_id() {
            headers.push((WORKSPACE_HEADER, workspace.clone()));
        }
    }
    if mutating {
        if let Some(token) = &context.csrf_token {
            headers.push((CSRF_HEADER, token.clone()));
        }
        if let Some(guid) = &context.socket_source_guid {
            headers.push((SOURCE_GUID_HEADER, guid.clone()));
        }
    }
    if context.graph_trace_enable {
        headers.push((TRACE_HEADER, "true".to_owned()));
    }
    headers
}

/// HTTP transport rooted at a backend base URL.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    context: RwLock<SessionContext>,
    observers: Vec<Arc<dyn ResponseObserver>>,
}

impl HttpTransport {
    /// Transport with a default client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Transport with a caller-configured client (timeouts, proxies, …).
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            context: RwLock::new(SessionContext::default()),
            observers: Vec::new(),
        }
    }

    /// Register a response observer.
    pub fn add_observer(&mut self, observer: Arc<dyn ResponseObserver>) {
        self.observers.push(observer);
    }

    /// Replace the session context used for request headers.
    pub fn set_context(&self, context: SessionContext) {
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = context;
    }

    /// Current session context.
    pub fn context(&self) -> SessionContext {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn resolve_url(&self, request: &AjaxRequest) -> String {
        let mut url = format!("{}{}", self.base_url, request.url);
        if request.method.uses_query() && !request.params.is_none() {
            url.push('?');
            url.push_str(&request.params.query_string());
        }
        url
    }

    fn build(&self, request: &AjaxRequest) -> Result<RequestBuilder, AjaxError> {
        let mut builder = self
            .client
            .request(request.method.verb.clone(), self.resolve_url(request));

        match &request.params {
            Params::Upload { fields, files } => {
                let tracker = Arc::new(UploadTracker::new(
                    files.iter().map(|f| f.bytes.len() as u64).sum(),
                    request.progress.clone(),
                ));
                let mut form = Form::new();
                for (name, value) in fields {
                    form = form.text(name.clone(), field_text(value));
                }
                for file in files {
                    let len = file.bytes.len() as u64;
                    let mut part = Part::stream_with_length(
                        tracked_body(file.bytes.clone(), Arc::clone(&tracker)),
                        len,
                    )
                    .file_name(file.file_name.clone());
                    if let Some(content_type) = &file.content_type {
                        part = part
                            .mime_str(content_type)
                            .map_err(|err| AjaxError::Build(err.to_string()))?;
                    }
                    form = form.part(file.field.clone(), part);
                }
                builder = builder.multipart(form);
            }
            Params::Fields(_) if request.method.verb == Method::POST => {
                builder = builder
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        "application/x-www-form-urlencoded",
                    )
                    .body(request.params.query_string());
            }
            _ => {}
        }

        if let Some(options) = &request.debug {
            warn!(url = %request.url, "request debugging is set");
            if let Some(message) = &options.error {
                builder = builder.header(DEBUG_ERROR_HEADER, message.as_str());
            }
            if let Some(body) = &options.error_json {
                let mut body = body.clone();
                if let Value::Object(map) = &mut body {
                    map.entry("invalidValues").or_insert_with(|| Value::Array(Vec::new()));
                }
                builder = builder.header(DEBUG_ERROR_JSON_HEADER, body.to_string());
            }
            if let Some(delay) = options.delay_ms {
                builder = builder.header(DEBUG_DELAY_HEADER, delay.to_string());
            }
        }

        let context = self.context();
        for (name, value) in session_headers(&context, &request.method, &request.params) {
            builder = builder.header(name, value);
        }
        Ok(builder)
    }

    async fn execute(&self, request: AjaxRequest) -> Result<AjaxResponse, AjaxError> {
        let builder = self.build(&request)?;
        debug!(route = %request.route(), "ajax request");
        let response = builder.send().await.map_err(|err| {
            if err.is_builder() {
                AjaxError::Build(err.to_string())
            } else {
                AjaxError::Network(err.to_string())
            }
        })?;
        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or_default().to_owned();
        let text = response
            .text()
            .await
            .map_err(|err| AjaxError::Network(err.to_string()))?;

        if status != StatusCode::OK {
            if text.trim_start().starts_with('{') {
                if let Ok(body) = serde_json::from_str::<Value>(&text) {
                    return Err(AjaxError::Remote(body));
                }
            }
            return Err(AjaxError::Status {
                status: status.as_u16(),
                status_text,
            });
        }
        if request.method.html {
            return Ok(AjaxResponse::Text(text));
        }
        let body: Value =
            serde_json::from_str(&text).map_err(|err| AjaxError::Parse(err.to_string()))?;
        for observer in &self.observers {
            observer.observe(&request.method, &request.url, &body);
        }
        Ok(AjaxResponse::Json(body))
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: AjaxRequest) -> BoxFuture<'_, Result<AjaxResponse, AjaxError>> {
        Box::pin(self.execute(request))
    }

    fn update_context(&self, context: SessionContext) {
        self.set_context(context);
    }
}

struct UploadTracker {
    sent: AtomicU64,
    total: u64,
    progress: Option<ProgressSender>,
}

impl UploadTracker {
    fn new(total: u64, progress: Option<ProgressSender>) -> Self {
        Self {
            sent: AtomicU64::new(0),
            total,
            progress,
        }
    }

    fn advance(&self, bytes: usize) {
        let sent = self.sent.fetch_add(bytes as u64, Ordering::Relaxed) + bytes as u64;
        let Some(progress) = &self.progress else {
            return;
        };
        if self.total == 0 {
            return;
        }
        let fraction = sent as f64 / self.total as f64;
        if fraction < 1.0 {
            let _ = progress.send(fraction);
        }
    }
}

fn tracked_body(bytes: Bytes, tracker: Arc<UploadTracker>) -> Body {
    let chunks: Vec<Bytes> = (0..bytes.len())
        .step_by(UPLOAD_CHUNK)
        .map(|start| bytes.slice(start..(start + UPLOAD_CHUNK).min(bytes.len())))
        .collect();
    Body::wrap_stream(stream::iter(chunks.into_iter().map(move |chunk| {
        tracker.advance(chunk.len());
        Ok::<Bytes, std::io::Error>(chunk)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> SessionContext {
        SessionContext {
            current_workspace_id: Some("w1".into()),
            csrf_token: Some("token".into()),
            socket_source_guid: Some("guid".into()),
            graph_trace_enable: false,
        }
    }

    #[test]
    fn get_requests_carry_only_the_workspace() {
        let headers = session_headers(&context(), &AjaxMethod::json(Method::GET), &Params::None);
        assert_eq!(headers, vec![(WORKSPACE_HEADER, "w1".to_owned())]);
    }

    #[test]
    fn mutating_requests_carry_csrf_and_guid() {
        let params = Params::from_value(json!({"workspaceId": "w2"}));
        let headers = session_headers(&context(), &AjaxMethod::json(Method::POST), &params);
        assert_eq!(
            headers,
            vec![
                (CSRF_HEADER, "token".to_owned()),
                (SOURCE_GUID_HEADER, "guid".to_owned())
            ]
        );
    }

    #[test]
    fn trace_flag_adds_header() {
        let ctx = SessionContext {
            graph_trace_enable: true,
            ..SessionContext::default()
        };
        let headers = session_headers(&ctx, &AjaxMethod::json(Method::GET), &Params::None);
        assert_eq!(headers, vec![(TRACE_HEADER, "true".to_owned())]);
    }

    #[test]
    fn query_is_appended_for_get_and_delete_only() {
        let transport = HttpTransport::new("http://host/api/");
        let fields = json!({"id": "v1"}).as_object().cloned().unwrap();
        let get = AjaxRequest::get("/vertex").with_fields(fields.clone());
        assert_eq!(transport.resolve_url(&get), "http://host/api/vertex?id=v1");
        let post = AjaxRequest::post("/vertex").with_fields(fields);
        assert_eq!(transport.resolve_url(&post), "http://host/api/vertex");
    }

    #[test]
    fn upload_progress_stays_below_one() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let tracker = UploadTracker::new(4, Some(tx));
        tracker.advance(1);
        tracker.advance(2);
        tracker.advance(1);
        assert!((rx.try_recv().unwrap() - 0.25).abs() < f64::EPSILON);
        assert!((rx.try_recv().unwrap() - 0.75).abs() < f64::EPSILON);
        assert!(rx.try_recv().is_err());
    }
}

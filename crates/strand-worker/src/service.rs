// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Services answering data requests.
//!
//! A data request names a service and a method; the service turns positional
//! arguments into a backend call. Built-in services are declarative route
//! tables ([`RestService`]); plugins register more at [`SERVICE_POINT`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use strand_registry::{DocOptions, ExtensionPoint, ExtensionRegistry};
use strand_store::Store;
use strand_transport::{AjaxRequest, ProgressSender, Transport};

use crate::ServiceError;

/// What a service call can reach.
#[derive(Clone)]
pub struct CallContext {
    /// Backend transport.
    pub transport: Arc<dyn Transport>,
    /// Canonical store.
    pub store: Store,
    /// Progress sink for this request.
    pub progress: Option<ProgressSender>,
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("store", &self.store)
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

/// A named group of methods callable by data requests.
pub trait Service: Send + Sync {
    /// Name data requests use.
    fn name(&self) -> &str;

    /// Run `method` with positional `args`.
    fn call<'a>(
        &'a self,
        context: &'a CallContext,
        method: &'a str,
        args: Vec<Value>,
    ) -> BoxFuture<'a, Result<Value, ServiceError>>;
}

/// How positional arguments become request fields.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ArgStyle {
    /// No arguments.
    None,
    /// The first argument is an object of fields.
    Object,
    /// Each argument fills the field of the same position; nulls are skipped.
    Named(Vec<String>),
}

/// One backend call a method maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: String,
    url: String,
    args: ArgStyle,
}

impl Route {
    /// Route without parameters. `method` is `GET`, `POST->HTML`, …
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_owned(),
            url: url.to_owned(),
            args: ArgStyle::None,
        }
    }

    /// Take the fields from an object argument.
    pub fn object(mut self) -> Self {
        self.args = ArgStyle::Object;
        self
    }

    /// Name the positional arguments.
    pub fn named(mut self, fields: &[&str]) -> Self {
        self.args = ArgStyle::Named(fields.iter().map(|f| (*f).to_owned()).collect());
        self
    }

    fn fields(&self, args: Vec<Value>) -> Result<Map<String, Value>, String> {
        match &self.args {
            ArgStyle::None => Ok(Map::new()),
            ArgStyle::Object => match args.into_iter().next() {
                None | Some(Value::Null) => Ok(Map::new()),
                Some(Value::Object(fields)) => Ok(fields),
                Some(other) => Err(format!("expected an object, got {other}")),
            },
            ArgStyle::Named(names) => {
                if args.len() > names.len() {
                    return Err(format!(
                        "expected at most {} arguments, got {}",
                        names.len(),
                        args.len()
                    ));
                }
                Ok(names
                    .iter()
                    .cloned()
                    .zip(args)
                    .filter(|(_, value)| !value.is_null())
                    .collect())
            }
        }
    }
}

/// Service backed by a table of routes.
#[derive(Debug, Clone)]
pub struct RestService {
    name: String,
    routes: BTreeMap<String, Route>,
}

impl RestService {
    /// Empty service called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: BTreeMap::new(),
        }
    }

    /// Add `method`.
    pub fn route(mut self, method: &str, route: Route) -> Self {
        self.routes.insert(method.to_owned(), route);
        self
    }

    /// Method names, sorted.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    async fn run(
        &self,
        context: &CallContext,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ServiceError> {
        let route = self
            .routes
            .get(method)
            .ok_or_else(|| ServiceError::UnknownMethod {
                service: self.name.clone(),
                method: method.to_owned(),
            })?;
        let fields = route
            .fields(args)
            .map_err(|reason| ServiceError::InvalidArgs {
                service: self.name.clone(),
                method: method.to_owned(),
                reason,
            })?;
        let mut request = AjaxRequest::parse(&route.method, route.url.as_str())?;
        if !fields.is_empty() {
            request = request.with_fields(fields);
        }
        if let Some(progress) = &context.progress {
            request = request.with_progress(progress.clone());
        }
        Ok(context.transport.send(request).await?.into_json())
    }
}

impl Service for RestService {
    fn name(&self) -> &str {
        &self.name
    }

    fn call<'a>(
        &'a self,
        context: &'a CallContext,
        method: &'a str,
        args: Vec<Value>,
    ) -> BoxFuture<'a, Result<Value, ServiceError>> {
        Box::pin(self.run(context, method, args))
    }
}

/// Built-in services.
pub fn builtin() -> Vec<RestService> {
    vec![
        RestService::new("vertex")
            .route("audit", Route::new("GET", "/vertex/audit").named(&["graphVertexId"]))
            .route("search", Route::new("POST", "/vertex/search").object())
            .route(
                "geo-search",
                Route::new("GET", "/vertex/geo-search").named(&["lat", "lon", "radius"]),
            )
            .route("findPath", Route::new("GET", "/vertex/find-path").object())
            .route("multiple", Route::new("POST", "/vertex/multiple").object())
            .route("exists", Route::new("POST", "/vertex/exists").object())
            .route(
                "properties",
                Route::new("GET", "/vertex/properties").named(&["graphVertexId"]),
            )
            .route(
                "propertyDetails",
                Route::new("GET", "/vertex/property/details").named(&[
                    "vertexId",
                    "propertyName",
                    "propertyKey",
                    "visibilitySource",
                ]),
            )
            .route("edges", Route::new("GET", "/vertex/edges").named(&["graphVertexId"]))
            .route("delete", Route::new("DELETE", "/vertex").named(&["graphVertexId"]))
            .route(
                "highlighted-text",
                Route::new("GET->HTML", "/vertex/highlighted-text")
                    .named(&["graphVertexId", "propertyKey"]),
            )
            .route("related", Route::new("POST", "/vertex/find-related").object())
            .route("create", Route::new("POST", "/vertex/new").object()),
        RestService::new("edge")
            .route("multiple", Route::new("POST", "/edge/multiple").object())
            .route("exists", Route::new("POST", "/edge/exists").object())
            .route(
                "properties",
                Route::new("GET", "/edge/properties").named(&["graphEdgeId"]),
            )
            .route("delete", Route::new("DELETE", "/edge").named(&["graphEdgeId"]))
            .route("create", Route::new("POST", "/edge/create").object()),
        RestService::new("product")
            .route("all", Route::new("GET", "/product/all"))
            .route("get", Route::new("GET", "/product").named(&["productId"]))
            .route("create", Route::new("POST", "/product").object())
            .route("update", Route::new("POST", "/product").object())
            .route("delete", Route::new("DELETE", "/product").named(&["productId"])),
        RestService::new("ontology")
            .route("ontology", Route::new("GET", "/ontology").object()),
        RestService::new("config")
            .route("properties", Route::new("GET", "/configuration").object()),
        RestService::new("workspace")
            .route("all", Route::new("GET", "/workspace/all"))
            .route("get", Route::new("GET", "/workspace").named(&["workspaceId"]))
            .route("diff", Route::new("GET", "/workspace/diff").named(&["workspaceId"]))
            .route("create", Route::new("POST", "/workspace/create").object())
            .route("delete", Route::new("DELETE", "/workspace").named(&["workspaceId"])),
    ]
}

/// A plugin-provided service.
pub struct ServiceExtension {
    /// Service to add; its name is what data requests use.
    pub service: Arc<dyn Service>,
}

impl fmt::Debug for ServiceExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceExtension")
            .field("name", &self.service.name())
            .finish()
    }
}

/// Extension point for [`ServiceExtension`]s.
pub const SERVICE_POINT: ExtensionPoint<ServiceExtension> =
    ExtensionPoint::new("strand.worker.service");

/// Resolves service names: registered plugins first, then built-ins.
pub struct ServiceRegistry {
    registry: Arc<ExtensionRegistry>,
    builtin: BTreeMap<String, Arc<dyn Service>>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("builtin", &self.builtin.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ServiceRegistry {
    /// Registry with the built-in services; documents [`SERVICE_POINT`].
    pub fn new(registry: Arc<ExtensionRegistry>) -> Result<Self, ServiceError> {
        registry.document(
            &SERVICE_POINT,
            "Add services callable through data requests",
            |extension: &ServiceExtension| !extension.service.name().is_empty(),
            DocOptions::default(),
        )?;
        let builtin = builtin()
            .into_iter()
            .map(|service| {
                let service: Arc<dyn Service> = Arc::new(service);
                (service.name().to_owned(), service)
            })
            .collect();
        Ok(Self { registry, builtin })
    }

    /// Service called `name`.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.registry
            .extensions_for(&SERVICE_POINT)
            .into_iter()
            .find(|extension| extension.service.name() == name)
            .map(|extension| Arc::clone(&extension.service))
            .or_else(|| self.builtin.get(name).cloned())
    }

    /// Call `service.method(args…)`.
    pub async fn call(
        &self,
        context: &CallContext,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ServiceError> {
        let Some(target) = self.resolve(service) else {
            return Err(ServiceError::UnknownService(service.to_owned()));
        };
        target.call(context, method, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn named_arguments_skip_nulls() {
        let route = Route::new("GET", "/x").named(&["a", "b"]);
        let fields = route.fields(vec![json!(null), json!(2)]).unwrap();
        assert_eq!(Value::Object(fields), json!({"b": 2}));
    }

    #[test]
    fn too_many_arguments_are_rejected() {
        let route = Route::new("GET", "/x").named(&["a"]);
        assert!(route.fields(vec![json!(1), json!(2)]).is_err());
    }

    #[test]
    fn object_style_wants_an_object() {
        let route = Route::new("POST", "/x").object();
        assert!(route.fields(vec![json!("text")]).is_err());
        assert!(route.fields(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn builtins_cover_the_store_routes() {
        let services = builtin();
        let vertex = services.iter().find(|s| s.name() == "vertex").unwrap();
        let methods: Vec<&str> = vertex.methods().collect();
        assert!(methods.contains(&"multiple"));
        assert!(methods.contains(&"exists"));
        let names: Vec<&str> = services.iter().map(Service::name).collect();
        assert_eq!(
            names,
            vec!["vertex", "edge", "product", "ontology", "config", "workspace"]
        );
    }
}

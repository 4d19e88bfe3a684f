//! Dispatch table and the immutable router instance built from one config.
use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::{Arc, Weak},
};

use axum::body::Body;
use futures_util::future::BoxFuture;
use hyper::{
    Method, Request, Response, StatusCode,
    header::{self, HeaderValue},
};

use crate::core::{
    gateway::{Gateway, GatewayError},
    middleware::Middleware,
    path_template::{PathParams, PathTemplate},
    resource::{Resource, ResourceError, ResourceStatus},
    service::{Service, ServiceStatus},
};

pub type HandlerFuture = BoxFuture<'static, Response<Body>>;

/// A bound request handler. Receives the request and the variables captured
/// from its path.
pub type Handler = Arc<dyn Fn(Request<Body>, PathParams) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Request<Body>, PathParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Body>> + Send + 'static,
{
    Arc::new(move |req, params| Box::pin(f(req, params)))
}

/// Join a mount path and a suffix, avoiding doubled separators.
pub fn join_path(mount: &str, suffix: &str) -> String {
    let base = mount.trim_end_matches('/');
    let suffix = suffix.trim_start_matches('/');
    match (base.is_empty(), suffix.is_empty()) {
        (true, true) => "/".to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{suffix}"),
    }
}

/// What resources receive while binding. The management API uses it to reach
/// the gateway that will own the instance.
#[derive(Debug, Clone, Default)]
pub struct BindContext {
    gateway: Weak<Gateway>,
}

impl BindContext {
    pub fn new(gateway: Weak<Gateway>) -> Self {
        Self { gateway }
    }

    /// A context with no gateway behind it, used for validation-only builds.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn gateway(&self) -> Option<Arc<Gateway>> {
        self.gateway.upgrade()
    }
}

#[derive(Clone)]
pub struct Route {
    pub resource: Arc<dyn Resource>,
    pub handler: Handler,
}

/// Result of looking a request up in a [`DispatchTable`].
pub enum Lookup {
    Found(Route, PathParams),
    /// The path exists, but only for these methods.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// Per-method path routers.
#[derive(Default)]
pub struct DispatchTable {
    methods: HashMap<Method, matchit::Router<Route>>,
    len: usize,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` for `method` at `path` (template syntax, `:name` and
    /// `*name`).
    pub fn handle(
        &mut self,
        method: Method,
        path: &str,
        resource: Arc<dyn Resource>,
        handler: Handler,
    ) -> Result<(), ResourceError> {
        let pattern = PathTemplate::parse(path).route_pattern();
        self.methods
            .entry(method.clone())
            .or_default()
            .insert(pattern, Route { resource, handler })
            .map_err(|e| ResourceError::Bind {
                path: format!("{method} {path}"),
                message: e.to_string(),
            })?;
        self.len += 1;
        Ok(())
    }

    pub fn lookup(&self, method: &Method, path: &str) -> Lookup {
        if let Some(router) = self.methods.get(method) {
            if let Ok(matched) = router.at(path) {
                return Lookup::Found(matched.value.clone(), matched.params.into());
            }
        }

        let mut allowed: Vec<Method> = self
            .methods
            .iter()
            .filter(|(m, router)| *m != method && router.at(path).is_ok())
            .map(|(m, _)| m.clone())
            .collect();

        if allowed.is_empty() {
            Lookup::NotFound
        } else {
            allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            Lookup::MethodNotAllowed(allowed)
        }
    }

    /// Number of bound handlers.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A route of the config after construction: mount path plus resource.
#[derive(Clone)]
pub struct MountedResource {
    pub route_id: String,
    pub mount: String,
    pub resource: Arc<dyn Resource>,
}

/// One immutable snapshot of the routing state.
pub struct RouterInstance {
    generation: i64,
    middleware: Vec<(String, Arc<dyn Middleware>)>,
    resources: Vec<MountedResource>,
    services: BTreeMap<String, Arc<Service>>,
    table: DispatchTable,
}

impl RouterInstance {
    /// Bind every resource onto a fresh dispatch table. A resource that fails
    /// to bind is logged and skipped.
    pub fn new(
        generation: i64,
        middleware: Vec<(String, Arc<dyn Middleware>)>,
        resources: Vec<MountedResource>,
        services: BTreeMap<String, Arc<Service>>,
        ctx: &BindContext,
    ) -> Self {
        let mut table = DispatchTable::new();
        for mounted in &resources {
            if let Err(e) = Arc::clone(&mounted.resource).add_handlers(&mounted.mount, &mut table, ctx)
            {
                tracing::warn!(
                    route = %mounted.route_id,
                    mount = %mounted.mount,
                    error = %e,
                    "Failed to bind resource handlers, skipping"
                );
            }
        }

        tracing::debug!(
            generation,
            handlers = table.len(),
            resources = resources.len(),
            services = services.len(),
            "Router instance constructed"
        );

        Self {
            generation,
            middleware,
            resources,
            services,
            table,
        }
    }

    /// `LastUpdated` of the config this instance was built from.
    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn middleware_names(&self) -> Vec<String> {
        self.middleware.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn resources(&self) -> &[MountedResource] {
        &self.resources
    }

    pub fn services(&self) -> &BTreeMap<String, Arc<Service>> {
        &self.services
    }

    pub fn service(&self, id: &str) -> Option<&Arc<Service>> {
        self.services.get(id)
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Route a request through the middleware chain to its handler.
    pub async fn dispatch(&self, req: Request<Body>) -> Response<Body> {
        let (route, params) = match self.table.lookup(req.method(), req.uri().path()) {
            Lookup::Found(route, params) => (route, params),
            Lookup::NotFound => return status_response(StatusCode::NOT_FOUND),
            Lookup::MethodNotAllowed(allowed) => {
                let mut response = status_response(StatusCode::METHOD_NOT_ALLOWED);
                let allow = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    response.headers_mut().insert(header::ALLOW, value);
                }
                return response;
            }
        };

        let (parts, body) = req.into_parts();
        for (name, middleware) in &self.middleware {
            if let Err(rejection) = middleware.handle(route.resource.as_ref(), &parts, &params) {
                tracing::debug!(
                    middleware = %name,
                    resource = %route.resource.id(),
                    status = %rejection.status,
                    "Request rejected by middleware"
                );
                return rejection.into_response();
            }
        }

        let req = Request::from_parts(parts, body);
        let mut response = (route.handler)(req, params).await;
        for (_, middleware) in &self.middleware {
            middleware.on_response(route.resource.as_ref(), &mut response);
        }
        response
    }

    /// Build and start every service, then start every resource. When any
    /// step fails, whatever was already started is stopped again.
    pub async fn start(&self) -> Result<(), GatewayError> {
        let mut started: Vec<&Arc<Service>> = Vec::with_capacity(self.services.len());

        for (id, service) in &self.services {
            let result = match service.build().await {
                Ok(()) => service.start().await,
                Err(e) => Err(e),
            };
            if let Err(source) = result {
                self.rollback_services(&started).await;
                return Err(GatewayError::Service {
                    id: id.clone(),
                    source,
                });
            }
            started.push(service);
        }

        for (i, mounted) in self.resources.iter().enumerate() {
            if let Err(e) = mounted.resource.start() {
                for earlier in self.resources[..i].iter().rev() {
                    if let Err(stop_err) = earlier.resource.stop() {
                        tracing::error!(route = %earlier.route_id, error = %stop_err, "Failed to stop resource during rollback");
                    }
                }
                self.rollback_services(&started).await;
                return Err(GatewayError::Resource(e));
            }
        }

        tracing::info!(
            generation = self.generation,
            resources = self.resources.len(),
            services = self.services.len(),
            "Router instance started"
        );
        Ok(())
    }

    async fn rollback_services(&self, started: &[&Arc<Service>]) {
        for service in started.iter().rev() {
            if let Err(e) = service.stop().await {
                tracing::error!(service = %service.id(), error = %e, "Failed to stop service during rollback");
            }
        }
    }

    /// Stop resources and release services after the instance was replaced.
    pub async fn retire(&self) {
        for mounted in &self.resources {
            if mounted.resource.status() != ResourceStatus::Started {
                continue;
            }
            if let Err(e) = mounted.resource.stop() {
                tracing::error!(route = %mounted.route_id, error = %e, "Failed to stop resource");
            }
        }

        for service in self.services.values().rev() {
            if service.status() != ServiceStatus::Started {
                continue;
            }
            if let Err(e) = service.stop().await {
                tracing::error!(service = %service.id(), error = %e, "Failed to stop service");
            }
        }

        tracing::info!(generation = self.generation, "Router instance retired");
    }
}

pub(crate) fn status_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::from(
        status.canonical_reason().unwrap_or_default().to_string(),
    ));
    *response.status_mut() = status;
    response
}

//! Self-management API over the Config Store and the gateway.
//!
//! Read endpoints:
//! * `GET {p}/middleware`, `{p}/routes`, `{p}/route/:id`
//! * `GET {p}/services`, `{p}/service/:id`
//! * `GET {p}/available_middleware`, `{p}/available_resources`,
//!   `{p}/resource_params/:type`
//!
//! Write endpoints take a JSON body with a `timestamp` that must not be older
//! than the stored `LastUpdated`:
//! * `POST {p}/set_middleware`, `{p}/add_route`, `{p}/delete_route`,
//!   `{p}/update_route`, `{p}/change_route`, `{p}/reload`
//!
//! Writes only change the stored config. The live routing table changes when
//! `reload` is called.
use std::{future::Future, sync::Arc};

use axum::body::Body;
use http_body_util::BodyExt;
use hyper::{Method, Request, Response, StatusCode, header};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    config::{
        models::{Config, ResourceConfig, RouteConfig, ServiceConfig},
        store::ConfigError,
    },
    core::{
        gateway::{Gateway, GatewayError},
        path_template::{PathParams, PathTemplate, SegmentKind},
        resource::{BaseResource, Resource, ResourceError},
        router::{BindContext, DispatchTable, handler, join_path},
    },
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiParams {}

pub struct Api {
    base: BaseResource,
}

impl Api {
    pub fn new(base: BaseResource, _params: ApiParams) -> Self {
        Self { base }
    }
}

/// Bind `endpoint` at `path`. The gateway is looked up per request; once it
/// is gone the endpoint answers 503.
fn bind<F, Fut>(
    api: &Arc<Api>,
    table: &mut DispatchTable,
    ctx: &BindContext,
    method: Method,
    path: String,
    endpoint: F,
) -> Result<(), ResourceError>
where
    F: Fn(Arc<Gateway>, Request<Body>, PathParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Body>> + Send + 'static,
{
    let ctx = ctx.clone();
    table.handle(
        method,
        &path,
        api.clone(),
        handler(move |req, params| {
            let call = ctx.gateway().map(|gateway| endpoint(gateway, req, params));
            async move {
                match call {
                    Some(call) => call.await,
                    None => text_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Gateway is not running".to_string(),
                    ),
                }
            }
        }),
    )
}

impl Resource for Api {
    fn base(&self) -> &BaseResource {
        &self.base
    }

    fn validate_mount(&self, mount: &PathTemplate) -> Result<(), ResourceError> {
        if mount.segments().iter().any(|s| s.kind == SegmentKind::CatchAll) {
            return Err(ResourceError::InvalidParams {
                id: self.id().to_string(),
                message: format!("cannot mount the API below the catch-all path '{mount}'"),
            });
        }
        Ok(())
    }

    fn add_handlers(
        self: Arc<Self>,
        mount: &str,
        table: &mut DispatchTable,
        ctx: &BindContext,
    ) -> Result<(), ResourceError> {
        let at = |suffix: &str| join_path(mount, suffix);

        bind(&self, table, ctx, Method::GET, at("middleware"), get_middleware)?;
        bind(&self, table, ctx, Method::GET, at("routes"), get_routes)?;
        bind(&self, table, ctx, Method::GET, at("route/:id"), get_route)?;
        bind(&self, table, ctx, Method::GET, at("services"), get_services)?;
        bind(&self, table, ctx, Method::GET, at("service/:id"), get_service)?;
        bind(&self, table, ctx, Method::GET, at("available_middleware"), get_available_middleware)?;
        bind(&self, table, ctx, Method::GET, at("available_resources"), get_available_resources)?;
        bind(&self, table, ctx, Method::GET, at("resource_params/:type"), get_resource_params)?;

        bind(&self, table, ctx, Method::POST, at("set_middleware"), set_middleware)?;
        bind(&self, table, ctx, Method::POST, at("add_route"), add_route)?;
        bind(&self, table, ctx, Method::POST, at("delete_route"), delete_route)?;
        bind(&self, table, ctx, Method::POST, at("update_route"), update_route)?;
        bind(&self, table, ctx, Method::POST, at("change_route"), change_route)?;
        bind(&self, table, ctx, Method::POST, at("reload"), reload)?;

        Ok(())
    }
}

fn text_response(status: StatusCode, message: String) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

fn json_response<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => text_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to marshal JSON: {e}"),
        ),
    }
}

/// Status code for a failed config read or update.
pub fn config_error_status(error: &ConfigError) -> StatusCode {
    match error {
        ConfigError::StaleTimestamp { .. } => StatusCode::PRECONDITION_FAILED,
        ConfigError::DuplicateRoute(_) => StatusCode::CONFLICT,
        ConfigError::UnknownRoute(_) => StatusCode::NOT_FOUND,
        e if e.is_invalid_config() => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn config_error_response(context: &str, error: &ConfigError) -> Response<Body> {
    text_response(config_error_status(error), format!("{context}: {error}"))
}

async fn read_config(gateway: &Gateway) -> Result<Config, Response<Body>> {
    gateway
        .store()
        .read()
        .await
        .map_err(|e| config_error_response("Failed to read config", &e))
}

async fn decode_body<T: DeserializeOwned>(req: Request<Body>) -> Result<T, Response<Body>> {
    let bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|e| text_response(StatusCode::BAD_REQUEST, format!("Failed to read body: {e}")))?
        .to_bytes();
    serde_json::from_slice(&bytes)
        .map_err(|e| text_response(StatusCode::BAD_REQUEST, format!("Failed to decode body: {e}")))
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceView<'a> {
    #[serde(flatten)]
    config: &'a ServiceConfig,
    /// Status in the live router instance, if it runs this service.
    status: Option<String>,
    ref_count: usize,
}

async fn service_view<'a>(gateway: &Gateway, config: &'a ServiceConfig) -> ServiceView<'a> {
    let status = gateway
        .current()
        .and_then(|instance| instance.service(&config.id).map(|s| s.status().to_string()));
    ServiceView {
        config,
        status,
        ref_count: gateway.store().service_manager().ref_count(&config.id).await,
    }
}

async fn get_middleware(gateway: Arc<Gateway>, _req: Request<Body>, _: PathParams) -> Response<Body> {
    match read_config(&gateway).await {
        Ok(config) => json_response(&config.middleware),
        Err(response) => response,
    }
}

async fn get_routes(gateway: Arc<Gateway>, _req: Request<Body>, _: PathParams) -> Response<Body> {
    match read_config(&gateway).await {
        Ok(config) => json_response(&config.routes),
        Err(response) => response,
    }
}

async fn get_route(gateway: Arc<Gateway>, _req: Request<Body>, params: PathParams) -> Response<Body> {
    let config = match read_config(&gateway).await {
        Ok(config) => config,
        Err(response) => return response,
    };
    match config.route(params.by_name("id")) {
        Some(route) => json_response(route),
        None => text_response(StatusCode::NOT_FOUND, "Route not found".to_string()),
    }
}

async fn get_services(gateway: Arc<Gateway>, _req: Request<Body>, _: PathParams) -> Response<Body> {
    let config = match read_config(&gateway).await {
        Ok(config) => config,
        Err(response) => return response,
    };
    let mut views = Vec::with_capacity(config.services.len());
    for service in &config.services {
        views.push(service_view(&gateway, service).await);
    }
    json_response(&views)
}

async fn get_service(gateway: Arc<Gateway>, _req: Request<Body>, params: PathParams) -> Response<Body> {
    let config = match read_config(&gateway).await {
        Ok(config) => config,
        Err(response) => return response,
    };
    match config.service(params.by_name("id")) {
        Some(service) => json_response(&service_view(&gateway, service).await),
        None => text_response(StatusCode::NOT_FOUND, "Service not found".to_string()),
    }
}

async fn get_available_middleware(
    gateway: Arc<Gateway>,
    _req: Request<Body>,
    _: PathParams,
) -> Response<Body> {
    json_response(&gateway.store().middleware_registry().available())
}

async fn get_available_resources(
    gateway: Arc<Gateway>,
    _req: Request<Body>,
    _: PathParams,
) -> Response<Body> {
    json_response(&gateway.store().resource_registry().available_types())
}

async fn get_resource_params(
    gateway: Arc<Gateway>,
    _req: Request<Body>,
    params: PathParams,
) -> Response<Body> {
    match gateway
        .store()
        .resource_registry()
        .params_shape(params.by_name("type"))
    {
        Ok(shape) => json_response(&shape),
        Err(e) => text_response(
            StatusCode::NOT_FOUND,
            format!("Failed to get resource params: {e}"),
        ),
    }
}

#[derive(Deserialize)]
struct SetMiddlewareBody {
    middleware: Vec<String>,
    timestamp: i64,
}

#[derive(Deserialize)]
struct AddRouteBody {
    route: RouteConfig,
    timestamp: i64,
}

#[derive(Deserialize)]
struct DeleteRouteBody {
    id: String,
    timestamp: i64,
}

#[derive(Deserialize)]
struct UpdateRouteBody {
    id: String,
    resource: ResourceConfig,
    timestamp: i64,
}

#[derive(Deserialize)]
struct ChangeRouteBody {
    id: String,
    route: String,
    timestamp: i64,
}

#[derive(Deserialize)]
struct ReloadBody {
    timestamp: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Updated {
    last_updated: i64,
}

async fn apply<F>(gateway: &Gateway, context: &str, mutator: F) -> Response<Body>
where
    F: FnOnce(&mut Config) -> Result<(), ConfigError>,
{
    match gateway.store().update(mutator).await {
        Ok(config) => json_response(&Updated {
            last_updated: config.last_updated,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "{context}");
            config_error_response(context, &e)
        }
    }
}

async fn set_middleware(gateway: Arc<Gateway>, req: Request<Body>, _: PathParams) -> Response<Body> {
    let body: SetMiddlewareBody = match decode_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    apply(&gateway, "Failed to update middleware", |config| {
        config.set_middleware(body.middleware, body.timestamp)
    })
    .await
}

async fn add_route(gateway: Arc<Gateway>, req: Request<Body>, _: PathParams) -> Response<Body> {
    let body: AddRouteBody = match decode_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    apply(&gateway, "Failed to add route", |config| {
        config.add_route(body.route, body.timestamp)
    })
    .await
}

async fn delete_route(gateway: Arc<Gateway>, req: Request<Body>, _: PathParams) -> Response<Body> {
    let body: DeleteRouteBody = match decode_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    apply(&gateway, "Failed to delete route", |config| {
        config.delete_route(&body.id, body.timestamp)
    })
    .await
}

async fn update_route(gateway: Arc<Gateway>, req: Request<Body>, _: PathParams) -> Response<Body> {
    let body: UpdateRouteBody = match decode_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    apply(&gateway, "Failed to update route", |config| {
        config.update_route(&body.id, body.resource, body.timestamp)
    })
    .await
}

async fn change_route(gateway: Arc<Gateway>, req: Request<Body>, _: PathParams) -> Response<Body> {
    let body: ChangeRouteBody = match decode_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    apply(&gateway, "Failed to change route", |config| {
        config.change_route(&body.id, body.route, body.timestamp)
    })
    .await
}

async fn reload(gateway: Arc<Gateway>, req: Request<Body>, _: PathParams) -> Response<Body> {
    let body: ReloadBody = match decode_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    let config = match read_config(&gateway).await {
        Ok(config) => config,
        Err(response) => return response,
    };
    if let Err(e) = config.check_timestamp(body.timestamp) {
        return config_error_response("Failed to reload", &e);
    }

    match gateway.reload().await {
        Ok(generation) => json_response(&Updated {
            last_updated: generation,
        }),
        Err(GatewayError::Config(e)) => config_error_response("Failed to reload", &e),
        Err(e) => {
            tracing::error!(error = %e, "Reload failed");
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to reload: {e}"),
            )
        }
    }
}

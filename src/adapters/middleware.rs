//! Built-in middleware available to every config.
use std::sync::Arc;

use axum::body::Body;
use hyper::{
    Response,
    header::{HeaderName, HeaderValue},
    http::request::Parts,
};

use crate::core::{
    middleware::{Middleware, Rejection},
    path_template::PathParams,
    registry::{MiddlewareRegistry, RegistryResult},
    resource::Resource,
};

/// Logs every dispatched request with the resource that handles it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Logger;

impl Middleware for Logger {
    fn handle(
        &self,
        resource: &dyn Resource,
        request: &Parts,
        _params: &PathParams,
    ) -> Result<(), Rejection> {
        tracing::info!(
            method = %request.method,
            path = request.uri.path(),
            resource = resource.id(),
            "Dispatching request"
        );
        Ok(())
    }

    fn on_response(&self, resource: &dyn Resource, response: &mut Response<Body>) {
        tracing::debug!(
            resource = resource.id(),
            status = response.status().as_u16(),
            "Resource responded"
        );
    }
}

const SECURITY_HEADERS: [(&str, &str); 4] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
];

/// Adds common hardening headers without overwriting ones a resource set.
#[derive(Debug, Default, Clone, Copy)]
pub struct SecurityHeaders;

impl Middleware for SecurityHeaders {
    fn handle(
        &self,
        _resource: &dyn Resource,
        _request: &Parts,
        _params: &PathParams,
    ) -> Result<(), Rejection> {
        Ok(())
    }

    fn on_response(&self, _resource: &dyn Resource, response: &mut Response<Body>) {
        let headers = response.headers_mut();
        for (name, value) in SECURITY_HEADERS {
            headers
                .entry(HeaderName::from_static(name))
                .or_insert_with(|| HeaderValue::from_static(value));
        }
    }
}

/// Register `logger` and `security_headers`.
pub fn register_builtin(registry: &mut MiddlewareRegistry) -> RegistryResult<()> {
    registry.register("logger", Arc::new(Logger))?;
    registry.register("security_headers", Arc::new(SecurityHeaders))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use hyper::{Method, Request, StatusCode};

    use super::*;
    use crate::core::{
        resource::BaseResource,
        router::{BindContext, DispatchTable, MountedResource, RouterInstance, handler},
        resource::ResourceError,
    };

    struct Hello {
        base: BaseResource,
    }

    impl Resource for Hello {
        fn base(&self) -> &BaseResource {
            &self.base
        }

        fn add_handlers(
            self: Arc<Self>,
            mount: &str,
            table: &mut DispatchTable,
            _ctx: &BindContext,
        ) -> Result<(), ResourceError> {
            table.handle(
                Method::GET,
                mount,
                self,
                handler(|_req, _params| async {
                    let mut response = Response::new(Body::from("hello"));
                    response
                        .headers_mut()
                        .insert("x-frame-options", HeaderValue::from_static("SAMEORIGIN"));
                    response
                }),
            )
        }
    }

    fn instance(middleware: Vec<(String, Arc<dyn Middleware>)>) -> RouterInstance {
        RouterInstance::new(
            1,
            middleware,
            vec![MountedResource {
                route_id: "hello".to_string(),
                mount: "/hello".to_string(),
                resource: Arc::new(Hello {
                    base: BaseResource::new("hello"),
                }),
            }],
            BTreeMap::new(),
            &BindContext::detached(),
        )
    }

    #[test]
    fn test_register_builtin() {
        let mut registry = MiddlewareRegistry::new();
        register_builtin(&mut registry).unwrap();
        assert_eq!(registry.available(), vec!["logger", "security_headers"]);
        assert!(register_builtin(&mut registry).is_err());
    }

    #[tokio::test]
    async fn test_security_headers_keep_existing_values() {
        let instance = instance(vec![
            ("logger".to_string(), Arc::new(Logger) as Arc<dyn Middleware>),
            ("security_headers".to_string(), Arc::new(SecurityHeaders)),
        ]);
        let req = Request::builder().uri("/hello").body(Body::empty()).unwrap();
        let response = instance.dispatch(req).await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
        assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
    }
}

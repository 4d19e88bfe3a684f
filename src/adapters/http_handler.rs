use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use axum::body::Body;
use hyper::{Request, Response, StatusCode, header};
use tracing::Instrument;

use crate::{
    core::{Gateway, GatewayError},
    tracing_setup::create_request_span,
};

/// HTTP entry point: hands every request to the gateway's live router
/// instance inside a request span.
pub struct HttpHandler {
    gateway: Arc<Gateway>,
    next_request_id: AtomicU64,
}

impl HttpHandler {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub async fn handle_request(&self, req: Request<Body>) -> Response<Body> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let span = create_request_span(req.method().as_str(), req.uri().path(), request_id);
        let started = Instant::now();

        let response = match self.gateway.dispatch(req).instrument(span.clone()).await {
            Ok(response) => response,
            Err(GatewayError::NotInitialized) => {
                tracing::warn!(parent: &span, "Request arrived before the first router instance");
                plain(StatusCode::SERVICE_UNAVAILABLE, "Gateway not initialized")
            }
            Err(e) => {
                tracing::error!(parent: &span, "Request handling error: {e}");
                plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };

        span.record("http.status_code", response.status().as_u16());
        span.record("duration_ms", started.elapsed().as_millis() as u64);
        response
    }
}

fn plain(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{
        adapters::{GitCli, ShellRuntime},
        config::ConfigStore,
        core::{
            registry::{MiddlewareRegistry, ResourceRegistry},
            service::ServiceManager,
        },
    };

    #[tokio::test]
    async fn test_uninitialized_gateway_is_503() {
        let manager = Arc::new(ServiceManager::new(
            PathBuf::from("services"),
            Arc::new(GitCli::new()),
            Arc::new(ShellRuntime::new()),
        ));
        let store = Arc::new(ConfigStore::new(
            PathBuf::from("missing.json"),
            Arc::new(ResourceRegistry::new()),
            Arc::new(MiddlewareRegistry::new()),
            manager,
        ));
        let handler = HttpHandler::new(Gateway::new(store));

        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = handler.handle_request(req).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

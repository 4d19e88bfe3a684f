use axum::body::Body;
use hyper::{Response, StatusCode, http::request::Parts};

use crate::core::{path_template::PathParams, resource::Resource};

/// Reason a middleware refused to let a request reach its resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub message: String,
}

impl Rejection {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.message));
        *response.status_mut() = self.status;
        response
    }
}

/// A step run before every resource handler of a router instance.
///
/// Middleware run in registration order. The first rejection short-circuits
/// the chain and is answered with its status code.
pub trait Middleware: Send + Sync + 'static {
    fn handle(
        &self,
        resource: &dyn Resource,
        request: &Parts,
        params: &PathParams,
    ) -> Result<(), Rejection>;

    /// Called with the handler's response, in registration order.
    fn on_response(&self, _resource: &dyn Resource, _response: &mut Response<Body>) {}
}

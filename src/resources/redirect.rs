use std::sync::Arc;

use axum::body::Body;
use hyper::{Method, Response, StatusCode, header};
use serde::{Deserialize, Serialize};

use crate::core::{
    path_template::{PathParams, PathTemplate},
    resource::{BaseResource, Resource, ResourceError, ensure_proxy_compatible},
    router::{BindContext, DispatchTable, handler, status_response},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RedirectParams {
    pub host: String,
    pub path: String,
}

/// Answers GET requests on its mount with `302 Found` pointing at
/// `Host + Path`, carrying the mount's captured variables over.
pub struct Redirect {
    base: BaseResource,
    host: String,
    path: PathTemplate,
}

impl Redirect {
    pub fn new(base: BaseResource, params: RedirectParams) -> Self {
        Self {
            base,
            host: params.host,
            path: PathTemplate::parse(&params.path),
        }
    }

    /// Absolute target for a request with `params` and optional `query`.
    pub fn location(&self, params: &PathParams, query: Option<&str>) -> String {
        target_url(&self.host, &self.path, params, query)
    }
}

/// `host + construct_path(path, params)`, with the query string appended.
pub(crate) fn target_url(
    host: &str,
    path: &PathTemplate,
    params: &PathParams,
    query: Option<&str>,
) -> String {
    let mut url = format!("{host}{}", path.construct_path(params));
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

impl Resource for Redirect {
    fn base(&self) -> &BaseResource {
        &self.base
    }

    fn validate_mount(&self, mount: &PathTemplate) -> Result<(), ResourceError> {
        ensure_proxy_compatible(mount, &self.path)
    }

    fn add_handlers(
        self: Arc<Self>,
        mount: &str,
        table: &mut DispatchTable,
        _ctx: &BindContext,
    ) -> Result<(), ResourceError> {
        ensure_proxy_compatible(&PathTemplate::parse(mount), &self.path)?;

        let this = Arc::clone(&self);
        table.handle(
            Method::GET,
            mount,
            self,
            handler(move |req, params| {
                let location = this.location(&params, req.uri().query());
                async move {
                    match header::HeaderValue::from_str(&location) {
                        Ok(value) => {
                            let mut response = Response::new(Body::empty());
                            *response.status_mut() = StatusCode::FOUND;
                            response.headers_mut().insert(header::LOCATION, value);
                            response
                        }
                        Err(_) => status_response(StatusCode::INTERNAL_SERVER_ERROR),
                    }
                }
            }),
        )
    }
}

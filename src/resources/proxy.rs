use std::{str::FromStr, sync::Arc};

use axum::body::Body;
use hyper::{Method, Request, Response, StatusCode, Uri};
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        path_template::{PathParams, PathTemplate},
        resource::{BaseResource, Resource, ResourceError, ensure_proxy_compatible},
        router::{BindContext, DispatchTable, handler},
    },
    ports::http_client::HttpClient,
    resources::redirect::target_url,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProxyParams {
    pub host: String,
    pub path: String,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string()]
}

impl Default for ProxyParams {
    fn default() -> Self {
        Self {
            host: String::new(),
            path: String::new(),
            methods: default_methods(),
        }
    }
}

/// Forwards requests on its mount to `Host + Path`.
pub struct Proxy {
    base: BaseResource,
    host: String,
    path: PathTemplate,
    methods: Vec<String>,
    client: Arc<dyn HttpClient>,
}

impl Proxy {
    pub fn new(base: BaseResource, params: ProxyParams, client: Arc<dyn HttpClient>) -> Self {
        Self {
            base,
            host: params.host,
            path: PathTemplate::parse(&params.path),
            methods: params.methods,
            client,
        }
    }

    fn parsed_methods(&self) -> Result<Vec<Method>, ResourceError> {
        self.methods
            .iter()
            .map(|raw| {
                Method::from_str(&raw.to_ascii_uppercase()).map_err(|_| {
                    ResourceError::InvalidParams {
                        id: self.id().to_string(),
                        message: format!("unknown HTTP method '{raw}'"),
                    }
                })
            })
            .collect()
    }

    async fn forward(&self, req: Request<Body>, params: PathParams) -> Response<Body> {
        let target = target_url(&self.host, &self.path, &params, req.uri().query());
        let uri = match Uri::from_str(&target) {
            Ok(uri) => uri,
            Err(e) => {
                return error_response(format!("Error creating proxy request: {e}"));
            }
        };

        let (mut parts, body) = req.into_parts();
        parts.uri = uri;
        let upstream = Request::from_parts(parts, body);

        match self.client.send_request(upstream).await {
            Ok(response) => response,
            Err(e) => error_response(format!("Error forwarding request: {e}")),
        }
    }
}

fn error_response(message: String) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

impl Resource for Proxy {
    fn base(&self) -> &BaseResource {
        &self.base
    }

    fn validate_mount(&self, mount: &PathTemplate) -> Result<(), ResourceError> {
        ensure_proxy_compatible(mount, &self.path)?;
        if self.methods.is_empty() {
            return Err(ResourceError::InvalidParams {
                id: self.id().to_string(),
                message: "Methods must not be empty".to_string(),
            });
        }
        self.parsed_methods().map(|_| ())
    }

    fn add_handlers(
        self: Arc<Self>,
        mount: &str,
        table: &mut DispatchTable,
        _ctx: &BindContext,
    ) -> Result<(), ResourceError> {
        ensure_proxy_compatible(&PathTemplate::parse(mount), &self.path)?;

        for method in self.parsed_methods()? {
            let this = Arc::clone(&self);
            table.handle(
                method,
                mount,
                self.clone(),
                handler(move |req, params| {
                    let this = Arc::clone(&this);
                    async move { this.forward(req, params).await }
                }),
            )?;
        }
        Ok(())
    }
}

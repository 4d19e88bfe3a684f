use std::{path::PathBuf, sync::Arc};

use hyper::Method;
use serde::{Deserialize, Serialize};

use crate::{
    adapters::FileSystemAdapter,
    core::{
        path_template::PathTemplate,
        resource::{BaseResource, Resource, ResourceError},
        router::{BindContext, DispatchTable, handler, status_response},
    },
    ports::file_system::FileSystem,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StaticFileParams {
    pub filepath: String,
}

/// Serves one file at its mount path.
pub struct StaticFile {
    base: BaseResource,
    filepath: PathBuf,
    fs: FileSystemAdapter,
}

impl StaticFile {
    pub fn new(base: BaseResource, params: StaticFileParams) -> Self {
        Self {
            base,
            filepath: PathBuf::from(params.filepath),
            fs: FileSystemAdapter::new(),
        }
    }
}

impl Resource for StaticFile {
    fn base(&self) -> &BaseResource {
        &self.base
    }

    fn validate_mount(&self, _mount: &PathTemplate) -> Result<(), ResourceError> {
        if self.filepath.as_os_str().is_empty() {
            return Err(ResourceError::InvalidParams {
                id: self.id().to_string(),
                message: "Filepath must not be empty".to_string(),
            });
        }
        Ok(())
    }

    fn add_handlers(
        self: Arc<Self>,
        mount: &str,
        table: &mut DispatchTable,
        _ctx: &BindContext,
    ) -> Result<(), ResourceError> {
        let this = Arc::clone(&self);
        table.handle(
            Method::GET,
            mount,
            self,
            handler(move |req, _params| {
                let this = Arc::clone(&this);
                async move {
                    match this.fs.serve_file(&this.filepath, req).await {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::error!(resource = %this.id(), error = %e, "Failed to serve file");
                            status_response(hyper::StatusCode::INTERNAL_SERVER_ERROR)
                        }
                    }
                }
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use axum::body::Body;
    use http_body_util::BodyExt;
    use hyper::{Request, StatusCode};
    use tempfile::TempDir;

    use super::*;
    use crate::core::router::{MountedResource, RouterInstance};

    #[tokio::test]
    async fn test_serves_configured_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("index.html");
        tokio::fs::write(&file, "<h1>hi</h1>").await.unwrap();

        let resource = Arc::new(StaticFile::new(
            BaseResource::new("index"),
            StaticFileParams {
                filepath: file.to_string_lossy().into_owned(),
            },
        ));
        let instance = RouterInstance::new(
            1,
            Vec::new(),
            vec![MountedResource {
                route_id: "index".to_string(),
                mount: "/".to_string(),
                resource,
            }],
            BTreeMap::new(),
            &BindContext::detached(),
        );

        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = instance.dispatch(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"<h1>hi</h1>");
    }

    #[test]
    fn test_empty_filepath_is_rejected() {
        let resource = StaticFile::new(BaseResource::new("x"), StaticFileParams::default());
        assert!(matches!(
            resource.validate_mount(&PathTemplate::parse("/x")),
            Err(ResourceError::InvalidParams { .. })
        ));
    }
}

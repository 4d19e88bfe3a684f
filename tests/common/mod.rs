#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use axum::body::Body;
use canopy::{
    Gateway, HttpClientAdapter,
    adapters::middleware,
    config::{Config, ConfigStore},
    core::{
        registry::{MiddlewareRegistry, ResourceRegistry},
        service::ServiceManager,
    },
    ports::{
        service_runtime::{RuntimeResult, ServiceDescriptor, ServiceRuntime},
        source_control::{SourceControl, SourceControlResult},
    },
    resources,
};
use http_body_util::BodyExt;
use hyper::{Request, Response};
use tempfile::TempDir;

/// Pretends to check out sources; remembers the last commit per folder.
#[derive(Default)]
pub struct FakeSource {
    pub checkouts: AtomicUsize,
    current: Mutex<Vec<(PathBuf, String)>>,
}

#[async_trait]
impl SourceControl for FakeSource {
    async fn is_checked_out(&self, folder: &Path, _remote: &str, commit: &str) -> bool {
        self.current
            .lock()
            .unwrap()
            .iter()
            .any(|(f, c)| f == folder && c == commit)
    }

    async fn checkout(&self, folder: &Path, _remote: &str, commit: &str) -> SourceControlResult<()> {
        tokio::fs::create_dir_all(folder).await?;
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        let mut current = self.current.lock().unwrap();
        current.retain(|(f, _)| f != folder);
        current.push((folder.to_path_buf(), commit.to_string()));
        Ok(())
    }
}

/// Counts external steps per kind.
#[derive(Default)]
pub struct FakeRuntime {
    pub builds: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

#[async_trait]
impl ServiceRuntime for FakeRuntime {
    async fn build(&self, _service: &ServiceDescriptor) -> RuntimeResult<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self, _service: &ServiceDescriptor) -> RuntimeResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _service: &ServiceDescriptor) -> RuntimeResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct TestGateway {
    pub dir: TempDir,
    pub config_path: PathBuf,
    pub gateway: Arc<Gateway>,
    pub source: Arc<FakeSource>,
    pub runtime: Arc<FakeRuntime>,
}

impl TestGateway {
    /// Write `config` into a fresh temp dir and wire a gateway over it. No
    /// instance is published yet.
    pub fn new(config: &Config) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("canopy.json");
        std::fs::write(&config_path, serde_json::to_vec_pretty(config).unwrap()).unwrap();

        let mut resource_registry = ResourceRegistry::new();
        resources::register_builtin(
            &mut resource_registry,
            Arc::new(HttpClientAdapter::new().unwrap()),
        )
        .unwrap();
        let mut middleware_registry = MiddlewareRegistry::new();
        middleware::register_builtin(&mut middleware_registry).unwrap();

        let source = Arc::new(FakeSource::default());
        let runtime = Arc::new(FakeRuntime::default());
        let services = Arc::new(ServiceManager::new(
            dir.path().join("services"),
            source.clone(),
            runtime.clone(),
        ));
        let store = Arc::new(ConfigStore::new(
            &config_path,
            Arc::new(resource_registry),
            Arc::new(middleware_registry),
            services,
        ));

        Self {
            gateway: Gateway::new(store),
            dir,
            config_path,
            source,
            runtime,
        }
    }

    pub fn write_config(&self, config: &Config) {
        std::fs::write(&self.config_path, serde_json::to_vec_pretty(config).unwrap()).unwrap();
    }

    pub fn config_bytes(&self) -> Vec<u8> {
        std::fs::read(&self.config_path).unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.gateway.dispatch(req).await.unwrap()
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.gateway.dispatch(req).await.unwrap()
    }
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// `Config::starter()` with extra routes parsed from JSON.
pub fn config_with_routes(last_updated: i64, routes: serde_json::Value) -> Config {
    let mut config = Config::starter();
    config.last_updated = last_updated;
    config
        .routes
        .extend(serde_json::from_value::<Vec<_>>(routes).unwrap());
    config
}

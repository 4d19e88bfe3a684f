//! Backing-service lifecycle with cross-instance reference counting.
//!
//! A [`Service`] value is created per router instance and walks the
//! `NotInitialized → Building → Built → Starting → Started → Stopping →
//! Stopped` state machine exactly once. Several router instances can hold a
//! `Service` with the same id at the same time (the outgoing and the incoming
//! instance during a reload). The [`ServiceManager`] keeps one reference
//! count per id so the external process is only stopped when the last
//! instance lets go of it.
use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::{
    ports::{
        service_runtime::{RuntimeError, ServiceDescriptor, ServiceRuntime},
        source_control::{SourceControl, SourceControlError},
    },
    tracing_setup::create_service_span,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceStatus {
    NotInitialized = 0,
    Building = 1,
    Built = 2,
    Starting = 3,
    Started = 4,
    Stopping = 5,
    Stopped = 6,
}

impl ServiceStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Building,
            2 => Self::Built,
            3 => Self::Starting,
            4 => Self::Started,
            5 => Self::Stopping,
            6 => Self::Stopped,
            _ => Self::NotInitialized,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotInitialized => "not initialized",
            Self::Building => "building",
            Self::Built => "built",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("cannot {operation} service '{id}' while it is {status}")]
    InvalidState {
        id: String,
        operation: &'static str,
        status: ServiceStatus,
    },

    #[error("service '{0}' is missing its reference count")]
    MissingRefCount(String),

    #[error("service '{0}' has a zero reference count")]
    ZeroRefCount(String),

    #[error("failed to check out service '{id}': {source}")]
    Checkout {
        id: String,
        #[source]
        source: SourceControlError,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("failed to record build hash for service '{id}': {source}")]
    HashRecord {
        id: String,
        #[source]
        source: std::io::Error,
    },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Where a service's code comes from and how it is driven.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSpec {
    pub remote: String,
    pub commit_hash: String,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub stop_command: Option<String>,
}

impl ServiceSpec {
    /// Content hash over everything that influences the built artifact.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha1::new();
        for part in [
            self.remote.as_str(),
            self.commit_hash.as_str(),
            self.build_command.as_deref().unwrap_or(""),
            self.start_command.as_deref().unwrap_or(""),
            self.stop_command.as_deref().unwrap_or(""),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Process-wide owner of service folders, external collaborators and
/// per-id reference counts.
pub struct ServiceManager {
    root: PathBuf,
    source: Arc<dyn SourceControl>,
    runtime: Arc<dyn ServiceRuntime>,
    ref_counts: Mutex<HashMap<String, usize>>,
}

impl ServiceManager {
    pub fn new(
        root: impl Into<PathBuf>,
        source: Arc<dyn SourceControl>,
        runtime: Arc<dyn ServiceRuntime>,
    ) -> Self {
        Self {
            root: root.into(),
            source,
            runtime,
            ref_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Checkout folder of service `id`.
    pub fn folder_for(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn hash_file_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.hash"))
    }

    /// Create a fresh, not yet built service value.
    pub fn service(self: &Arc<Self>, id: impl Into<String>, spec: ServiceSpec) -> Service {
        let id = id.into();
        let hash = spec.content_hash();
        Service {
            folder: self.folder_for(&id),
            id,
            spec,
            hash,
            status: AtomicU8::new(ServiceStatus::NotInitialized as u8),
            manager: Arc::clone(self),
        }
    }

    /// Current number of live references to service `id`.
    pub async fn ref_count(&self, id: &str) -> usize {
        self.ref_counts.lock().await.get(id).copied().unwrap_or(0)
    }
}

impl fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceManager")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// One router instance's handle on a backing service.
pub struct Service {
    id: String,
    spec: ServiceSpec,
    folder: PathBuf,
    hash: String,
    status: AtomicU8,
    manager: Arc<ServiceManager>,
}

impl Service {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn folder(&self) -> &std::path::Path {
        &self.folder
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: ServiceStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn transition(
        &self,
        operation: &'static str,
        from: ServiceStatus,
        to: ServiceStatus,
    ) -> ServiceResult<()> {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| ServiceError::InvalidState {
                id: self.id.clone(),
                operation,
                status: ServiceStatus::from_u8(actual),
            })
    }

    fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor {
            id: self.id.clone(),
            folder: self.folder.clone(),
            build_command: self.spec.build_command.clone(),
            start_command: self.spec.start_command.clone(),
            stop_command: self.spec.stop_command.clone(),
        }
    }

    /// Check out the pinned commit (if the folder is stale) and build it
    /// (if the last recorded build hash differs). Only valid once, from
    /// `NotInitialized`; a failed build returns to `NotInitialized`.
    pub async fn build(&self) -> ServiceResult<()> {
        self.transition("build", ServiceStatus::NotInitialized, ServiceStatus::Building)?;

        let span = create_service_span(&self.id, "build");
        match self.run_build().instrument(span).await {
            Ok(()) => {
                self.set_status(ServiceStatus::Built);
                tracing::info!(service = %self.id, hash = %self.hash, "Service built");
                Ok(())
            }
            Err(e) => {
                self.set_status(ServiceStatus::NotInitialized);
                tracing::error!(service = %self.id, error = %e, "Service build failed");
                Err(e)
            }
        }
    }

    async fn run_build(&self) -> ServiceResult<()> {
        let manager = &self.manager;
        let spec = &self.spec;

        let checked_out = manager
            .source
            .is_checked_out(&self.folder, &spec.remote, &spec.commit_hash)
            .await;
        if !checked_out {
            tracing::info!(
                service = %self.id,
                remote = %spec.remote,
                commit = %spec.commit_hash,
                "Checking out service source"
            );
            manager
                .source
                .checkout(&self.folder, &spec.remote, &spec.commit_hash)
                .await
                .map_err(|source| ServiceError::Checkout {
                    id: self.id.clone(),
                    source,
                })?;
        }

        let hash_file = manager.hash_file_for(&self.id);
        if checked_out {
            if let Ok(recorded) = tokio::fs::read_to_string(&hash_file).await {
                if recorded.trim() == self.hash {
                    tracing::debug!(service = %self.id, "Build is up to date, skipping build step");
                    return Ok(());
                }
            }
        }

        manager.runtime.build(&self.descriptor()).await?;

        tokio::fs::write(&hash_file, &self.hash)
            .await
            .map_err(|source| ServiceError::HashRecord {
                id: self.id.clone(),
                source,
            })
    }

    /// Take a reference on the service id and run the external start step.
    ///
    /// The reference is taken before the step runs so that a concurrent
    /// `stop` from another instance cannot tear the process down meanwhile.
    /// On failure the reference is released again and the service returns
    /// to `Built`.
    pub async fn start(&self) -> ServiceResult<()> {
        self.transition("start", ServiceStatus::Built, ServiceStatus::Starting)?;

        let previous = {
            let mut counts = self.manager.ref_counts.lock().await;
            let count = counts.entry(self.id.clone()).or_insert(0);
            *count += 1;
            *count - 1
        };

        let descriptor = self.descriptor();
        let started = self
            .manager
            .runtime
            .start(&descriptor)
            .instrument(create_service_span(&self.id, "start"))
            .await;
        if let Err(e) = started {
            self.release_reference().await;
            self.set_status(ServiceStatus::Built);
            tracing::error!(service = %self.id, error = %e, "Service start failed");
            return Err(e.into());
        }

        self.set_status(ServiceStatus::Started);
        if previous == 0 {
            tracing::info!(service = %self.id, "Service started");
        } else {
            tracing::info!(
                service = %self.id,
                references = previous + 1,
                "Service already running, reference added"
            );
        }
        Ok(())
    }

    async fn release_reference(&self) {
        let mut counts = self.manager.ref_counts.lock().await;
        if let Some(count) = counts.get_mut(&self.id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&self.id);
            }
        }
    }

    /// Drop this instance's reference; the last reference runs the external
    /// stop step. The ref-count lock is held across that step so no start
    /// can slip in between the decision and the stop. If anything fails the
    /// count is left untouched and the service stays `Started`.
    pub async fn stop(&self) -> ServiceResult<()> {
        self.transition("stop", ServiceStatus::Started, ServiceStatus::Stopping)?;

        let mut counts = self.manager.ref_counts.lock().await;
        let result = match counts.get(&self.id).copied() {
            None => Err(ServiceError::MissingRefCount(self.id.clone())),
            Some(0) => Err(ServiceError::ZeroRefCount(self.id.clone())),
            Some(1) => match self.manager.runtime.stop(&self.descriptor()).await {
                Ok(()) => {
                    counts.remove(&self.id);
                    tracing::info!(service = %self.id, "Service stopped");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
            Some(n) => {
                counts.insert(self.id.clone(), n - 1);
                tracing::info!(
                    service = %self.id,
                    references = n - 1,
                    "Service still referenced, leaving it running"
                );
                Ok(())
            }
        };
        drop(counts);

        match result {
            Ok(()) => {
                self.set_status(ServiceStatus::Stopped);
                Ok(())
            }
            Err(e) => {
                self.set_status(ServiceStatus::Started);
                tracing::error!(service = %self.id, error = %e, "Service stop failed");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("hash", &self.hash)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        path::Path,
        sync::{Mutex as StdMutex, atomic::AtomicUsize},
    };

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::ports::{service_runtime::RuntimeResult, source_control::SourceControlResult};

    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub checkouts: AtomicUsize,
        pub current: StdMutex<Option<String>>,
    }

    #[async_trait]
    impl SourceControl for FakeSource {
        async fn is_checked_out(&self, _folder: &Path, _remote: &str, commit: &str) -> bool {
            self.current.lock().unwrap().as_deref() == Some(commit)
        }

        async fn checkout(
            &self,
            folder: &Path,
            _remote: &str,
            commit: &str,
        ) -> SourceControlResult<()> {
            tokio::fs::create_dir_all(folder).await?;
            self.checkouts.fetch_add(1, Ordering::SeqCst);
            *self.current.lock().unwrap() = Some(commit.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeRuntime {
        pub builds: AtomicUsize,
        pub starts: AtomicUsize,
        pub stops: AtomicUsize,
        pub fail_start: std::sync::atomic::AtomicBool,
        pub fail_stop: std::sync::atomic::AtomicBool,
    }

    fn step_failed(service: &ServiceDescriptor, step: &'static str) -> RuntimeError {
        RuntimeError::StepFailed {
            service: service.id.clone(),
            step,
            status: "exit status: 1".to_string(),
            stderr: "injected".to_string(),
        }
    }

    #[async_trait]
    impl ServiceRuntime for FakeRuntime {
        async fn build(&self, _service: &ServiceDescriptor) -> RuntimeResult<()> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn start(&self, service: &ServiceDescriptor) -> RuntimeResult<()> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(step_failed(service, "start"));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self, service: &ServiceDescriptor) -> RuntimeResult<()> {
            if self.fail_stop.load(Ordering::SeqCst) {
                return Err(step_failed(service, "stop"));
            }
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(dir: &TempDir) -> (Arc<ServiceManager>, Arc<FakeSource>, Arc<FakeRuntime>) {
        let source = Arc::new(FakeSource::default());
        let runtime = Arc::new(FakeRuntime::default());
        let manager = Arc::new(ServiceManager::new(
            dir.path(),
            source.clone(),
            runtime.clone(),
        ));
        (manager, source, runtime)
    }

    fn spec() -> ServiceSpec {
        ServiceSpec {
            remote: "https://example.com/app.git".to_string(),
            commit_hash: "0123abcd".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lifecycle_in_order() {
        let dir = TempDir::new().unwrap();
        let (manager, source, runtime) = manager(&dir);
        let service = manager.service("app", spec());

        assert_eq!(service.status(), ServiceStatus::NotInitialized);
        service.build().await.unwrap();
        assert_eq!(service.status(), ServiceStatus::Built);
        assert_eq!(source.checkouts.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.builds.load(Ordering::SeqCst), 1);

        service.start().await.unwrap();
        assert_eq!(service.status(), ServiceStatus::Started);
        assert_eq!(manager.ref_count("app").await, 1);

        service.stop().await.unwrap();
        assert_eq!(service.status(), ServiceStatus::Stopped);
        assert_eq!(manager.ref_count("app").await, 0);
        assert_eq!(runtime.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_calls_fail() {
        let dir = TempDir::new().unwrap();
        let (manager, _, _) = manager(&dir);
        let service = manager.service("app", spec());

        assert!(matches!(
            service.start().await,
            Err(ServiceError::InvalidState { operation: "start", .. })
        ));
        assert!(matches!(
            service.stop().await,
            Err(ServiceError::InvalidState { operation: "stop", .. })
        ));

        service.build().await.unwrap();
        assert!(matches!(
            service.build().await,
            Err(ServiceError::InvalidState { operation: "build", .. })
        ));
        assert_eq!(manager.ref_count("app").await, 0);
    }

    #[tokio::test]
    async fn test_shared_id_stops_once_last_reference_goes() {
        let dir = TempDir::new().unwrap();
        let (manager, _, runtime) = manager(&dir);
        let old = manager.service("app", spec());
        let new = manager.service("app", spec());

        for service in [&old, &new] {
            service.build().await.unwrap();
            service.start().await.unwrap();
        }
        assert_eq!(manager.ref_count("app").await, 2);
        assert_eq!(runtime.starts.load(Ordering::SeqCst), 2);

        old.stop().await.unwrap();
        assert_eq!(runtime.stops.load(Ordering::SeqCst), 0);
        assert_eq!(manager.ref_count("app").await, 1);

        new.stop().await.unwrap();
        assert_eq!(runtime.stops.load(Ordering::SeqCst), 1);
        assert_eq!(manager.ref_count("app").await, 0);
    }

    #[tokio::test]
    async fn test_second_build_with_same_hash_skips_build_step() {
        let dir = TempDir::new().unwrap();
        let (manager, source, runtime) = manager(&dir);

        manager.service("app", spec()).build().await.unwrap();
        manager.service("app", spec()).build().await.unwrap();
        assert_eq!(source.checkouts.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.builds.load(Ordering::SeqCst), 1);

        let changed = ServiceSpec {
            build_command: Some("make".to_string()),
            ..spec()
        };
        manager.service("app", changed).build().await.unwrap();
        assert_eq!(runtime.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_start_releases_reference() {
        let dir = TempDir::new().unwrap();
        let (manager, _, runtime) = manager(&dir);
        let service = manager.service("app", spec());
        service.build().await.unwrap();

        runtime.fail_start.store(true, Ordering::SeqCst);
        assert!(service.start().await.is_err());
        assert_eq!(service.status(), ServiceStatus::Built);
        assert_eq!(manager.ref_count("app").await, 0);

        runtime.fail_start.store(false, Ordering::SeqCst);
        service.start().await.unwrap();
        assert_eq!(manager.ref_count("app").await, 1);
    }

    #[tokio::test]
    async fn test_failed_stop_leaves_count_unchanged() {
        let dir = TempDir::new().unwrap();
        let (manager, _, runtime) = manager(&dir);
        let service = manager.service("app", spec());
        service.build().await.unwrap();
        service.start().await.unwrap();

        runtime.fail_stop.store(true, Ordering::SeqCst);
        assert!(service.stop().await.is_err());
        assert_eq!(service.status(), ServiceStatus::Started);
        assert_eq!(manager.ref_count("app").await, 1);

        runtime.fail_stop.store(false, Ordering::SeqCst);
        service.stop().await.unwrap();
        assert_eq!(manager.ref_count("app").await, 0);
    }

    #[tokio::test]
    async fn test_stop_without_reference_is_reported() {
        let dir = TempDir::new().unwrap();
        let (manager, _, _) = manager(&dir);
        let service = manager.service("app", spec());
        service.build().await.unwrap();
        service.start().await.unwrap();

        // Simulate a corrupted table.
        manager.ref_counts.lock().await.remove("app");
        assert!(matches!(
            service.stop().await,
            Err(ServiceError::MissingRefCount(id)) if id == "app"
        ));
        assert_eq!(service.status(), ServiceStatus::Started);
    }

    #[test]
    fn test_content_hash_tracks_every_field() {
        let base = spec().content_hash();
        assert_eq!(base, spec().content_hash());
        assert_ne!(
            base,
            ServiceSpec {
                commit_hash: "ffff".to_string(),
                ..spec()
            }
            .content_hash()
        );
        assert_ne!(
            base,
            ServiceSpec {
                stop_command: Some("true".to_string()),
                ..spec()
            }
            .content_hash()
        );
    }
}

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

/// Error type for service runtime operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RuntimeError {
    /// A build / start / stop step exited unsuccessfully
    #[error("{step} step for service '{service}' failed with {status}: {stderr}")]
    StepFailed {
        service: String,
        step: &'static str,
        status: String,
        stderr: String,
    },

    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for service runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Everything a runtime needs to know to act on one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub id: String,
    /// Checkout folder the steps run in
    pub folder: PathBuf,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub stop_command: Option<String>,
}

/// ServiceRuntime defines the port (interface) for building, starting and
/// stopping a backing service
///
/// `start` may be called for a service that is already running and must
/// succeed without side effects in that case.
#[async_trait]
pub trait ServiceRuntime: Send + Sync + 'static {
    async fn build(&self, service: &ServiceDescriptor) -> RuntimeResult<()>;

    async fn start(&self, service: &ServiceDescriptor) -> RuntimeResult<()>;

    async fn stop(&self, service: &ServiceDescriptor) -> RuntimeResult<()>;
}

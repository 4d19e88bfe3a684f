use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// Error type for source checkout operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SourceControlError {
    /// A source control command exited unsuccessfully
    #[error("`{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for source control operations
pub type SourceControlResult<T> = Result<T, SourceControlError>;

/// SourceControl defines the port (interface) for fetching a service's
/// source code at a pinned commit
#[async_trait]
pub trait SourceControl: Send + Sync + 'static {
    /// Whether `folder` already holds a checkout of `remote` at `commit`
    async fn is_checked_out(&self, folder: &Path, remote: &str, commit: &str) -> bool;

    /// Replace whatever is in `folder` with a checkout of `remote` at `commit`
    async fn checkout(&self, folder: &Path, remote: &str, commit: &str)
    -> SourceControlResult<()>;
}

use std::path::Path;

use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Error type for file system operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FileSystemError {
    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error when path is invalid
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Result type for file system operations
pub type FileSystemResult<T> = Result<T, FileSystemError>;

/// What a path on disk points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Missing,
}

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// FileSystem defines the port (interface) for handling static files
pub trait FileSystem: Send + Sync + 'static {
    /// Serve the file at `path`, honoring conditional and range headers of
    /// `req`. A missing file is answered with 404.
    fn serve_file(
        &self,
        path: &Path,
        req: Request<AxumBody>,
    ) -> impl std::future::Future<Output = FileSystemResult<Response<AxumBody>>> + Send;

    fn entry_kind(
        &self,
        path: &Path,
    ) -> impl std::future::Future<Output = FileSystemResult<EntryKind>> + Send;

    /// Children of the directory at `path`, sorted by name.
    fn list_directory(
        &self,
        path: &Path,
    ) -> impl std::future::Future<Output = FileSystemResult<Vec<DirEntry>>> + Send;
}

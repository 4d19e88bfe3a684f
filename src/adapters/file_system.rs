use std::path::{Component, Path, PathBuf};

use axum::body::Body as AxumBody;
use http_body_util::BodyExt;
use hyper::{Request, Response};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::ports::file_system::{
    DirEntry, EntryKind, FileSystem, FileSystemError, FileSystemResult,
};

/// File system adapter using tower-http ServeFile for static file serving
#[derive(Debug, Default, Clone)]
pub struct FileSystemAdapter;

impl FileSystemAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a request-relative path beneath `root`.
    ///
    /// Any `..`, root or prefix component is rejected, and an existing target
    /// must canonicalize to a location inside the canonical root, so neither
    /// traversal segments nor symlinks can leave the directory.
    pub async fn resolve(&self, root: &Path, relative: &str) -> FileSystemResult<PathBuf> {
        let mut full_path = root.to_path_buf();
        for component in Path::new(relative.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => full_path.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(FileSystemError::InvalidPath(
                        "Path traversal attempt detected".to_string(),
                    ));
                }
            }
        }

        let canonical_root = tokio::fs::canonicalize(root).await?;
        match tokio::fs::canonicalize(&full_path).await {
            Ok(canonical) if !canonical.starts_with(&canonical_root) => Err(
                FileSystemError::InvalidPath("Path traversal attempt detected".to_string()),
            ),
            Ok(_) => Ok(full_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(full_path),
            Err(e) => Err(FileSystemError::IoError(e)),
        }
    }
}

impl FileSystem for FileSystemAdapter {
    async fn serve_file(
        &self,
        path: &Path,
        req: Request<AxumBody>,
    ) -> FileSystemResult<Response<AxumBody>> {
        let response = ServeFile::new(path)
            .oneshot(req)
            .await
            .map_err(|e| FileSystemError::IoError(std::io::Error::other(format!("ServeFile error: {e}"))))?;

        let (parts, tower_body) = response.into_parts();
        let axum_body = AxumBody::new(tower_body.map_err(|e| {
            tracing::error!("Error reading static file body: {}", e);
            axum::Error::new(e)
        }));

        Ok(Response::from_parts(parts, axum_body))
    }

    async fn entry_kind(&self, path: &Path) -> FileSystemResult<EntryKind> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_dir() => Ok(EntryKind::Directory),
            Ok(_) => Ok(EntryKind::File),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EntryKind::Missing),
            Err(e) => Err(FileSystemError::IoError(e)),
        }
    }

    async fn list_directory(&self, path: &Path) -> FileSystemResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;

        while let Some(entry) = dir.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(DirEntry { name, is_dir });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

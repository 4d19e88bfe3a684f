//! Whitelisted static directory serving.
//!
//! Each whitelist entry becomes one or two GET routes under the mount path:
//!
//! | entry   | routes                                    |
//! |---------|-------------------------------------------|
//! | `a.txt` | `{mount}/a.txt`                           |
//! | `img*`  | `{mount}/img`, `{mount}/img/*filepath`    |
//! | `*`     | `{mount}`, `{mount}/*filepath`            |
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::body::Body;
use hyper::{Method, Response, StatusCode, header};
use serde::{Deserialize, Serialize};

use crate::{
    adapters::FileSystemAdapter,
    core::{
        path_template::{PathParams, PathTemplate, SegmentKind},
        resource::{BaseResource, Resource, ResourceError},
        router::{BindContext, DispatchTable, handler, join_path, status_response},
    },
    ports::file_system::{DirEntry, EntryKind, FileSystem},
};

const CAPTURE: &str = "filepath";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StaticDirectoryParams {
    pub path: String,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub allow_directory_browsing: bool,
}

/// A parsed whitelist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    /// One file, relative to the directory root.
    Literal(String),
    /// Everything beneath a prefix; empty for the whole directory.
    Prefix(String),
}

impl Entry {
    fn parse(raw: &str) -> Self {
        match raw.strip_suffix('*') {
            Some(prefix) => Entry::Prefix(prefix.trim_matches('/').to_string()),
            None => Entry::Literal(raw.trim_start_matches('/').to_string()),
        }
    }

    fn relative(&self) -> &str {
        match self {
            Entry::Literal(path) | Entry::Prefix(path) => path,
        }
    }
}

pub struct StaticDirectory {
    base: BaseResource,
    root: PathBuf,
    entries: Vec<Entry>,
    allow_browsing: bool,
    fs: FileSystemAdapter,
}

impl StaticDirectory {
    pub fn new(base: BaseResource, params: StaticDirectoryParams) -> Self {
        let mut whitelist = params.whitelist;
        if whitelist.is_empty() {
            whitelist.push("*".to_string());
        }

        Self {
            base,
            root: PathBuf::from(params.path),
            entries: whitelist.iter().map(|raw| Entry::parse(raw)).collect(),
            allow_browsing: params.allow_directory_browsing,
            fs: FileSystemAdapter::new(),
        }
    }

    async fn serve(
        &self,
        relative: String,
        req: hyper::Request<Body>,
    ) -> Response<Body> {
        let path = match self.fs.resolve(&self.root, &relative).await {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!(resource = %self.id(), path = %relative, error = %e, "Rejected directory path");
                return status_response(StatusCode::NOT_FOUND);
            }
        };

        let kind = match self.fs.entry_kind(&path).await {
            Ok(kind) => kind,
            Err(e) => {
                tracing::error!(resource = %self.id(), error = %e, "Failed to stat path");
                return status_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        match kind {
            EntryKind::Missing => status_response(StatusCode::NOT_FOUND),
            EntryKind::Directory if !self.allow_browsing => status_response(StatusCode::NOT_FOUND),
            EntryKind::Directory => {
                let request_path = req.uri().path().to_string();
                self.listing(&path, &request_path).await
            }
            EntryKind::File => match self.fs.serve_file(&path, req).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(resource = %self.id(), error = %e, "Failed to serve file");
                    status_response(StatusCode::INTERNAL_SERVER_ERROR)
                }
            },
        }
    }

    async fn listing(&self, dir: &Path, request_path: &str) -> Response<Body> {
        match self.fs.list_directory(dir).await {
            Ok(entries) => {
                let mut response = Response::new(Body::from(render_listing(request_path, &entries)));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    header::HeaderValue::from_static("text/html; charset=utf-8"),
                );
                response
            }
            Err(e) => {
                tracing::error!(resource = %self.id(), error = %e, "Failed to list directory");
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_listing(request_path: &str, entries: &[DirEntry]) -> String {
    let base = request_path.trim_end_matches('/');
    let title = escape_html(if request_path.is_empty() { "/" } else { request_path });

    let mut html = format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Index of {title}</title></head>\n<body><h1>Index of {title}</h1>\n<ul>\n"
    );
    for entry in entries {
        let suffix = if entry.is_dir { "/" } else { "" };
        html.push_str(&format!(
            "<li><a href=\"{base}/{href}{suffix}\">{name}{suffix}</a></li>\n",
            href = urlencoding::encode(&entry.name),
            name = escape_html(&entry.name),
        ));
    }
    html.push_str("</ul></body></html>\n");
    html
}

impl Resource for StaticDirectory {
    fn base(&self) -> &BaseResource {
        &self.base
    }

    fn validate_mount(&self, mount: &PathTemplate) -> Result<(), ResourceError> {
        let invalid = |message: String| ResourceError::InvalidParams {
            id: self.id().to_string(),
            message,
        };

        if self.root.as_os_str().is_empty() {
            return Err(invalid("Path must not be empty".to_string()));
        }
        if mount.segments().iter().any(|s| s.kind == SegmentKind::CatchAll) {
            return Err(invalid(format!(
                "cannot mount a directory below the catch-all path '{mount}'"
            )));
        }
        for entry in &self.entries {
            let relative = entry.relative();
            if relative.split('/').any(|part| part == "..") || relative.contains('*') {
                return Err(invalid(format!("invalid whitelist entry '{relative}'")));
            }
            if matches!(entry, Entry::Literal(path) if path.is_empty()) {
                return Err(invalid("empty whitelist entry".to_string()));
            }
        }
        Ok(())
    }

    fn add_handlers(
        self: Arc<Self>,
        mount: &str,
        table: &mut DispatchTable,
        _ctx: &BindContext,
    ) -> Result<(), ResourceError> {
        for entry in &self.entries {
            let relative = entry.relative().to_string();
            let exact = join_path(mount, &relative);

            let this = Arc::clone(&self);
            let fixed = relative.clone();
            table.handle(
                Method::GET,
                &exact,
                self.clone(),
                handler(move |req, _params| {
                    let this = Arc::clone(&this);
                    let fixed = fixed.clone();
                    async move { this.serve(fixed, req).await }
                }),
            )?;

            if let Entry::Prefix(prefix) = entry {
                let this = Arc::clone(&self);
                let prefix = prefix.clone();
                table.handle(
                    Method::GET,
                    &join_path(&exact, &format!("*{CAPTURE}")),
                    self.clone(),
                    handler(move |req, params: PathParams| {
                        let this = Arc::clone(&this);
                        let captured = urlencoding::decode(params.by_name(CAPTURE))
                            .map(|decoded| decoded.into_owned())
                            .unwrap_or_else(|_| params.by_name(CAPTURE).to_string());
                        let relative = if prefix.is_empty() {
                            captured
                        } else {
                            format!("{prefix}/{captured}")
                        };
                        async move { this.serve(relative, req).await }
                    }),
                )?;
            }
        }
        Ok(())
    }
}

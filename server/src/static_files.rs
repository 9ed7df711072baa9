use std::path::{Component, Path, PathBuf};

use axum::http::header;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::error::{AppError, Result};

/// Serve `requested` (relative to `root`) with a content type from its extension.
///
/// Anything that cannot be resolved inside the root answers 404, whether the
/// file is missing or the path tried to leave the root.
pub async fn serve(root: &Path, requested: &str) -> Result<Response> {
    let not_found = || AppError::NotFound(requested.to_string());

    let path = resolve(root, requested).await.ok_or_else(not_found)?;
    let body = tokio::fs::read(&path).await.map_err(|e| {
        debug!(path = %path.display(), error = %e, "static read failed");
        not_found()
    })?;

    Ok(([(header::CONTENT_TYPE, content_type(&path))], body).into_response())
}

/// Reduce a request path to plain relative components.
///
/// `..`, absolute roots and drive prefixes reject the whole path; empty and
/// `.` segments are dropped.
pub fn sanitize(requested: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

/// Canonical path of `requested` under `root`, or `None` if it does not exist
/// or resolves (e.g. through a symlink) outside the root.
pub async fn resolve(root: &Path, requested: &str) -> Option<PathBuf> {
    let relative = sanitize(requested)?;
    let root = tokio::fs::canonicalize(root).await.ok()?;
    let candidate = tokio::fs::canonicalize(root.join(relative)).await.ok()?;
    candidate.starts_with(&root).then_some(candidate)
}

pub fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

//! Read-only HTTP view of the download directory.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use log::{debug, info};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::error::{Error, Result};
use crate::manifest::SNAPSHOT_FILE;

/// Manifest snapshot rewritten for mirror clients, preferred over the
/// upstream copy when present.
pub const MIRROR_MANIFEST_FILE: &str = "mirror.json";

#[derive(Debug, Clone)]
pub struct MirrorState {
    download_dir: Arc<PathBuf>,
}

impl MirrorState {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: Arc::new(download_dir.into()),
        }
    }
}

pub fn router(state: MirrorState) -> Router {
    Router::new().fallback(serve_path).with_state(state)
}

pub async fn serve(addr: SocketAddr, download_dir: PathBuf) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::io(addr.to_string(), e))?;
    info!("mirror: serving {} on http://{addr}", download_dir.display());
    axum::serve(listener, router(MirrorState::new(&download_dir)))
        .await
        .map_err(|e| Error::io(download_dir, e))
}

/// Request path with `..` sequences removed, relative to the mirror root.
/// `None` when anything other than plain names remains.
pub fn sanitize_path(raw: &str) -> Option<PathBuf> {
    let stripped = raw.replace("..", "");
    let mut relative = PathBuf::new();
    for component in Path::new(stripped.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

async fn serve_path(State(state): State<MirrorState>, req: Request) -> Response {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let raw = req.uri().path().to_owned();
    let Some(relative) = sanitize_path(&raw) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    debug!("mirror: {} {raw}", req.method());

    if relative.extension().is_some_and(|ext| ext == "json") {
        return manifest_snapshot(&state.download_dir).await;
    }

    let path = state.download_dir.join(&relative);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return StatusCode::NOT_FOUND.into_response(),
    }
    match ServeFile::new(&path).oneshot(req).await {
        Ok(response) => response.into_response(),
        Err(err) => match err {},
    }
}

async fn manifest_snapshot(dir: &Path) -> Response {
    for name in [MIRROR_MANIFEST_FILE, SNAPSHOT_FILE] {
        if let Ok(body) = tokio::fs::read(dir.join(name)).await {
            return ([(CONTENT_TYPE, "application/json")], body).into_response();
        }
    }
    StatusCode::NOT_FOUND.into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;

    use super::*;

    async fn get(dir: &Path, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router(MirrorState::new(dir))
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_owned());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, body.to_vec())
    }

    #[test]
    fn strips_traversal_sequences() {
        assert_eq!(
            sanitize_path("/../../etc/passwd"),
            Some(PathBuf::from("etc/passwd"))
        );
        assert_eq!(sanitize_path("/a/..b"), Some(PathBuf::from("a/b")));
        assert_eq!(sanitize_path("/"), None);
        assert_eq!(sanitize_path("/.."), None);
    }

    #[tokio::test]
    async fn serves_files_from_download_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("torbrowser-linux64-en-US.tar.xz"), b"bundle").unwrap();

        let (status, _, body) = get(dir.path(), "/torbrowser-linux64-en-US.tar.xz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"bundle");

        let (status, _, _) = get(dir.path(), "/missing.asc").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn traversal_stays_inside_root() {
        let root = tempfile::tempdir().unwrap();
        let served = root.path().join("tor-browser");
        std::fs::create_dir_all(&served).unwrap();
        std::fs::write(root.path().join("secret"), b"outside").unwrap();

        let (status, _, _) = get(&served, "/../secret").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn json_requests_return_manifest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SNAPSHOT_FILE), br#"{"version":"1"}"#).unwrap();

        let (status, content_type, body) = get(dir.path(), "/anything.json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/json"));
        assert_eq!(body, br#"{"version":"1"}"#);

        std::fs::write(dir.path().join(MIRROR_MANIFEST_FILE), b"{}").unwrap();
        let (_, _, body) = get(dir.path(), "/downloads.json").await;
        assert_eq!(body, b"{}");
    }

    #[tokio::test]
    async fn directories_are_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let (status, _, _) = get(dir.path(), "/sub").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

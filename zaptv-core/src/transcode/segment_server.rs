//! Loopback HTTP file server for HLS manifests and segments.
//!
//! Serves strictly from within the HLS root; requests resolve as
//! `/<sessionId>/<filename>` into session-private directories. Path
//! traversal, symlinks and other non-regular-file targets are rejected
//! before any read happens.

use std::net::Ipv4Addr;
use std::path::{Component, Path, PathBuf};

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::Response;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::net::allocate_port;

#[derive(Clone)]
struct ServerState {
    root: PathBuf,
}

/// A running segment server rooted at the HLS output directory.
pub struct SegmentServer {
    port: u16,
    handle: tokio::task::JoinHandle<()>,
}

impl SegmentServer {
    /// Binds and serves, probing upward from the preferred port.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - Listener could not be bound after one retry
    pub async fn start(root: PathBuf, preferred_port: u16) -> std::io::Result<Self> {
        let router = segment_router(root);

        let mut port = allocate_port(preferred_port).await?;
        let listener = match tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => listener,
            Err(_) => {
                // Lost the probe race; allocate once more.
                port = allocate_port(preferred_port).await?;
                tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?
            }
        };

        tracing::info!("HLS segment server listening on http://127.0.0.1:{port}");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("Segment server exited: {e}");
            }
        });

        Ok(Self { port, handle })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for SegmentServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Builds the file-serving router. Exposed separately so tests can drive it
/// without binding a socket.
pub fn segment_router(root: PathBuf) -> Router {
    Router::new()
        .fallback(serve_file)
        .with_state(ServerState { root })
}

async fn serve_file(State(state): State<ServerState>, method: Method, uri: Uri) -> Response {
    if method == Method::OPTIONS {
        return with_stream_headers(Response::builder().status(StatusCode::OK), None)
            .body(Body::empty())
            .expect("static response");
    }

    let decoded = match urlencoding::decode(uri.path()) {
        Ok(path) => path.into_owned(),
        Err(_) => return status_response(StatusCode::FORBIDDEN, "Forbidden"),
    };

    let Some(path) = resolve_within_root(&state.root, &decoded) else {
        debug!("Rejected path escaping HLS root: {decoded}");
        return status_response(StatusCode::FORBIDDEN, "Forbidden");
    };

    let metadata = match tokio::fs::symlink_metadata(&path).await {
        Ok(metadata) => metadata,
        Err(_) => return status_response(StatusCode::NOT_FOUND, "Not found"),
    };
    if !metadata.is_file() {
        return status_response(StatusCode::FORBIDDEN, "Forbidden: Not a file");
    }

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(_) => return status_response(StatusCode::NOT_FOUND, "Not found"),
    };

    // A read error mid-body terminates the connection; headers are already
    // gone by then so there is nothing else to send.
    let body = Body::from_stream(ReaderStream::new(file));
    with_stream_headers(
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, metadata.len()),
        Some(&path),
    )
    .body(body)
    .expect("static response")
}

/// Resolves a request path against the root, refusing any component that
/// could escape it. No `..`, no absolute paths, no prefix tricks.
fn resolve_within_root(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(request_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if resolved == root {
        return None;
    }
    Some(resolved)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("m3u8") => "application/x-mpegURL",
        Some("ts") => "video/MP2T",
        _ => "application/octet-stream",
    }
}

fn with_stream_headers(
    builder: axum::http::response::Builder,
    path: Option<&Path>,
) -> axum::http::response::Builder {
    let builder = builder
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS")
        .header(header::CACHE_CONTROL, "no-cache");
    match path {
        Some(path) => builder.header(header::CONTENT_TYPE, content_type_for(path)),
        None => builder,
    }
}

fn status_response(status: StatusCode, message: &str) -> Response {
    with_stream_headers(Response::builder().status(status), None)
        .body(Body::from(message.to_string()))
        .expect("static response")
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;

    fn fixture() -> (TempDir, Router) {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("7")).unwrap();
        std::fs::write(
            root.path().join("7").join("stream.m3u8"),
            "#EXTM3U\n#EXT-X-VERSION:3\n",
        )
        .unwrap();
        std::fs::write(root.path().join("7").join("segment000.ts"), b"\x47tsdata").unwrap();
        let router = segment_router(root.path().to_path_buf());
        (root, router)
    }

    async fn get(router: Router, path: &str) -> Response {
        router
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn serves_manifest_with_hls_content_type() {
        let (_root, router) = fixture();
        let response = get(router, "/7/stream.m3u8").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-mpegURL"
        );
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-cache"
        );

        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert!(body.starts_with(b"#EXTM3U"));
    }

    #[tokio::test]
    async fn serves_segment_with_mpegts_content_type() {
        let (_root, router) = fixture();
        let response = get(router, "/7/segment000.ts").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/MP2T"
        );
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_root, router) = fixture();
        let response = get(router, "/7/segment999.ts").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn traversal_is_forbidden_and_reads_nothing_outside_root() {
        let (root, router) = fixture();
        // A secret outside the root that a traversal would reach.
        let secret = root.path().parent().unwrap().join("zaptv-secret-marker");
        std::fs::write(&secret, b"secret").unwrap();

        let response = get(router.clone(), "/../zaptv-secret-marker").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // Percent-encoded traversal must not fare better.
        let response = get(router, "/7/%2e%2e/%2e%2e/zaptv-secret-marker").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        std::fs::remove_file(secret).unwrap();
    }

    #[tokio::test]
    async fn directory_target_is_forbidden() {
        let (_root, router) = fixture();
        let response = get(router, "/7").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn options_preflight_short_circuits() {
        let (_root, router) = fixture();
        let response = router
            .oneshot(
                Request::options("/7/stream.m3u8")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn unknown_extension_falls_back_to_octet_stream() {
        let (root, router) = fixture();
        std::fs::write(root.path().join("7").join("notes.txt"), b"x").unwrap();
        let response = get(router, "/7/notes.txt").await;
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/octet-stream"
        );
    }
}

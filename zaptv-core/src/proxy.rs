//! CORS-bypassing media proxy.
//!
//! The in-app demuxers run inside a renderer that enforces browser origin
//! rules, and IPTV providers rarely send CORS headers. This proxy relays an
//! arbitrary upstream resource byte-for-byte on a loopback port, adding
//! permissive CORS headers and preserving Range semantics so seeking keeps
//! working. Retries belong to the playback orchestrator, never to this layer.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::Response;
use axum::routing::any;
use serde::Deserialize;

use crate::config::ProxyConfig;
use crate::net::allocate_port;

/// Errors surfaced by the proxy layer.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream request failed: {reason}")]
    Upstream { reason: String },

    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to bind proxy listener: {0}")]
    Bind(#[from] std::io::Error),
}

#[derive(Clone)]
struct ProxyState {
    client: reqwest::Client,
    config: ProxyConfig,
}

#[derive(Deserialize)]
struct StreamQuery {
    url: Option<String>,
}

/// A running media proxy bound to a loopback port.
pub struct MediaProxy {
    port: u16,
    handle: tokio::task::JoinHandle<()>,
}

impl MediaProxy {
    /// Binds and starts the proxy, probing upward from the preferred port.
    ///
    /// The probe-vs-bind race is handled by retrying allocation once if the
    /// real bind loses it.
    ///
    /// # Errors
    ///
    /// - `ProxyError::Bind` - Listener could not be bound after the retry
    pub async fn start(config: ProxyConfig) -> Result<Self, ProxyError> {
        let router = proxy_router(config.clone());

        let mut port = allocate_port(config.preferred_port).await?;
        let listener = match tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => listener,
            Err(_) => {
                // Lost the probe race; allocate once more.
                port = allocate_port(config.preferred_port).await?;
                tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?
            }
        };

        tracing::info!("Media proxy listening on http://127.0.0.1:{port}/stream");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("Media proxy server exited: {e}");
            }
        });

        Ok(Self { port, handle })
    }

    /// Port the proxy is serving on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Rewrites a stream URL to pass through this proxy.
    pub fn proxied_url(&self, stream_url: &str) -> String {
        format!(
            "http://127.0.0.1:{}/stream?url={}",
            self.port,
            urlencoding::encode(stream_url)
        )
    }

    /// Local address of the proxy.
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }
}

impl Drop for MediaProxy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Builds the proxy router. Exposed separately so tests can drive it without
/// binding a socket.
pub fn proxy_router(config: ProxyConfig) -> Router {
    // Idle timeouts, not a total deadline: a live stream relays indefinitely
    // as long as bytes keep flowing, and only a silent upstream trips it.
    let client = reqwest::Client::builder()
        .connect_timeout(config.upstream_timeout)
        .read_timeout(config.upstream_timeout)
        .build()
        .expect("reqwest client construction cannot fail with static options");

    Router::new()
        .route("/stream", any(relay_stream))
        .with_state(ProxyState { client, config })
}

async fn relay_stream(
    State(state): State<ProxyState>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Response {
    if method == Method::OPTIONS {
        return preflight_response();
    }

    let Some(target) = query.url.filter(|u| !u.is_empty()) else {
        return plain_response(StatusCode::BAD_REQUEST, "Missing url parameter");
    };

    let upstream_method = match reqwest::Method::from_bytes(method.as_str().as_bytes()) {
        Ok(m) => m,
        Err(_) => return plain_response(StatusCode::BAD_REQUEST, "Unsupported method"),
    };

    tracing::debug!("Proxying stream: {target}");

    let mut request = state
        .client
        .request(upstream_method, &target)
        .header(header::USER_AGENT, state.config.user_agent)
        .header(header::ACCEPT, "*/*")
        .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9");

    // Forward Range so the renderer can seek
    if let Some(range) = headers.get(header::RANGE) {
        tracing::debug!("Range request: {:?}", range);
        request = request.header(header::RANGE, range.clone());
    }

    let upstream = match request.send().await {
        Ok(response) => response,
        Err(e) if e.is_timeout() => {
            tracing::warn!("Upstream timed out: {target}");
            return plain_response(StatusCode::GATEWAY_TIMEOUT, "Gateway timeout");
        }
        Err(e) => {
            tracing::warn!("Proxy error for {target}: {e}");
            return plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Proxy error: {e}"),
            );
        }
    };

    let mut builder = Response::builder()
        .status(upstream.status())
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_EXPOSE_HEADERS, "*")
        .header(header::ACCEPT_RANGES, "bytes");

    // Copy the content headers the demuxers rely on, nothing else
    for name in [
        header::CONTENT_TYPE,
        header::CONTENT_LENGTH,
        header::CONTENT_RANGE,
    ] {
        if let Some(value) = upstream.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }

    // Stream the body through without buffering it
    let body = Body::from_stream(upstream.bytes_stream());
    builder
        .body(body)
        .unwrap_or_else(|_| plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Proxy error"))
}

fn preflight_response() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS")
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "*")
        .body(Body::empty())
        .expect("static response")
}

fn plain_response(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from(message.to_string()))
        .expect("static response")
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;

    fn test_router() -> Router {
        proxy_router(ProxyConfig::default())
    }

    #[tokio::test]
    async fn missing_url_parameter_is_bad_request() {
        let response = test_router()
            .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Missing url parameter");
    }

    #[tokio::test]
    async fn empty_url_parameter_is_bad_request() {
        let response = test_router()
            .oneshot(Request::get("/stream?url=").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn options_preflight_short_circuits() {
        let response = test_router()
            .oneshot(
                Request::options("/stream?url=http%3A%2F%2Fexample.com%2Fx.ts")
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
    async fn unreachable_upstream_maps_to_error_response() {
        // Nothing listens on this port; the connect error must come back as a
        // 500-class body, not a hung connection.
        let response = test_router()
            .oneshot(
                Request::get("/stream?url=http%3A%2F%2F127.0.0.1%3A9%2Fdead.ts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn relays_body_and_content_headers() {
        // Minimal upstream that serves a fixed MPEG-TS-ish payload.
        let upstream = Router::new().route(
            "/live.ts",
            axum::routing::get(|headers: HeaderMap| async move {
                let mut response = Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "video/MP2T");
                if let Some(range) = headers.get(header::RANGE) {
                    response = response
                        .status(StatusCode::PARTIAL_CONTENT)
                        .header(header::CONTENT_RANGE, range.clone());
                }
                response.body(Body::from("tsdata")).unwrap()
            }),
        );
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let upstream_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, upstream).await.unwrap() });

        let target = format!("http://127.0.0.1:{upstream_port}/live.ts");
        let uri = format!("/stream?url={}", urlencoding::encode(&target));
        let response = test_router()
            .oneshot(
                Request::get(&uri)
                    .header(header::RANGE, "bytes=0-5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/MP2T"
        );
        // Range was forwarded upstream and Content-Range came back
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes=0-5"
        );
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );

        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"tsdata");
    }

    #[tokio::test]
    async fn long_lived_stream_outlives_the_idle_timeout() {
        use std::convert::Infallible;

        use futures::StreamExt;

        // Upstream drips a chunk every 40ms for ~400ms in total, well past
        // the 100ms idle timeout. No single gap exceeds the timeout, so the
        // relay must deliver every byte.
        let upstream = Router::new().route(
            "/live.ts",
            axum::routing::get(|| async {
                let chunks = futures::stream::iter(0..10).then(|_| async {
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    Ok::<_, Infallible>([0x47u8; 188].to_vec())
                });
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "video/MP2T")
                    .body(Body::from_stream(chunks))
                    .unwrap()
            }),
        );
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let upstream_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, upstream).await.unwrap() });

        let config = ProxyConfig {
            upstream_timeout: Duration::from_millis(100),
            ..ProxyConfig::default()
        };
        let target = format!("http://127.0.0.1:{upstream_port}/live.ts");
        let uri = format!("/stream?url={}", urlencoding::encode(&target));
        let response = proxy_router(config)
            .oneshot(Request::get(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        assert_eq!(body.len(), 10 * 188);
    }

    #[tokio::test]
    async fn proxied_url_percent_encodes_target() {
        let proxy = MediaProxy {
            port: 9876,
            handle: tokio::spawn(async {}),
        };
        let url = proxy.proxied_url("http://h/live.ts?token=a b");
        assert!(url.contains("url=http%3A%2F%2Fh%2Flive.ts%3Ftoken%3Da%20b"));
    }
}

//! Media proxy in front of live loopback upstreams.

use std::net::Ipv4Addr;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use axum::routing::get;
use zaptv_core::config::ProxyConfig;
use zaptv_core::proxy::MediaProxy;

const SEGMENT_BYTES: &[u8] = b"\x47\x40\x11\x10fake-transport-stream-payload";

/// Upstream that serves a fake segment and echoes Range requests back as
/// Content-Range, the way a seekable VOD origin would.
async fn spawn_upstream() -> String {
    let router = Router::new().route(
        "/live/segment.ts",
        get(|headers: HeaderMap| async move {
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "video/MP2T")
                .header(header::CONTENT_LENGTH, SEGMENT_BYTES.len());
            if let Some(range) = headers.get(header::RANGE) {
                builder = builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_RANGE, range);
            }
            builder.body(Body::from(SEGMENT_BYTES)).unwrap()
        }),
    );
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/live/segment.ts")
}

fn test_proxy_config() -> ProxyConfig {
    ProxyConfig {
        preferred_port: 19876,
        ..ProxyConfig::default()
    }
}

#[tokio::test]
async fn proxy_relays_upstream_bytes_with_cors_headers() {
    let upstream_url = spawn_upstream().await;
    let proxy = MediaProxy::start(test_proxy_config()).await.unwrap();

    let response = reqwest::get(proxy.proxied_url(&upstream_url)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
    assert_eq!(response.headers().get("content-type").unwrap(), "video/MP2T");
    assert_eq!(response.bytes().await.unwrap().as_ref(), SEGMENT_BYTES);
}

#[tokio::test]
async fn proxy_forwards_range_requests_to_upstream() {
    let upstream_url = spawn_upstream().await;
    let proxy = MediaProxy::start(test_proxy_config()).await.unwrap();

    let client = reqwest::Client::new();
    let response = client
        .get(proxy.proxied_url(&upstream_url))
        .header("Range", "bytes=4-11")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get("content-range").unwrap(),
        "bytes=4-11"
    );
    assert_eq!(response.headers().get("accept-ranges").unwrap(), "bytes");
}

#[tokio::test]
async fn missing_url_parameter_is_a_client_error() {
    let proxy = MediaProxy::start(test_proxy_config()).await.unwrap();

    let target = format!("http://127.0.0.1:{}/stream", proxy.port());
    let response = reqwest::get(target).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "Missing url parameter");
}

#[tokio::test]
async fn unreachable_upstream_maps_to_bad_gateway_class_error() {
    let proxy = MediaProxy::start(test_proxy_config()).await.unwrap();

    // Nothing listens on this port; connection is refused immediately.
    let response = reqwest::get(proxy.proxied_url("http://127.0.0.1:9/segment.ts"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn slow_upstream_times_out_as_gateway_timeout() {
    let router = Router::new().route(
        "/slow.ts",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            StatusCode::OK
        }),
    );
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let config = ProxyConfig {
        upstream_timeout: Duration::from_millis(200),
        ..test_proxy_config()
    };
    let proxy = MediaProxy::start(config).await.unwrap();

    let response = reqwest::get(proxy.proxied_url(&format!("http://{addr}/slow.ts")))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn two_proxies_share_the_preferred_port_by_probing_upward() {
    let first = MediaProxy::start(test_proxy_config()).await.unwrap();
    let second = MediaProxy::start(test_proxy_config()).await.unwrap();

    assert_ne!(first.port(), second.port());
    assert!(second.port() > first.port());
}

//! Transcode manager and segment server working together over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use zaptv_core::config::TranscodeConfig;
use zaptv_core::transcode::{
    SegmentServer, SimulatedTranscoder, TranscodeError, TranscodeManager,
};

fn test_config(hls_root: &TempDir) -> TranscodeConfig {
    TranscodeConfig {
        preferred_hls_port: 29877,
        hls_root: hls_root.path().to_path_buf(),
        kill_grace: Duration::from_millis(10),
        manifest_poll_interval: Duration::from_millis(10),
        manifest_timeout: Duration::from_millis(400),
        ..TranscodeConfig::default()
    }
}

async fn spawn_manager(
    hls_root: &TempDir,
    transcoder: SimulatedTranscoder,
) -> (TranscodeManager, SegmentServer) {
    TranscodeManager::start_with_server(test_config(hls_root), Arc::new(transcoder))
        .await
        .unwrap()
}

#[tokio::test]
async fn ready_session_serves_its_manifest_over_http() {
    let root = TempDir::new().unwrap();
    let (manager, _server) = spawn_manager(
        &root,
        SimulatedTranscoder::ready_after(Duration::from_millis(30)),
    )
    .await;

    let ready = manager
        .start_transcode("http://upstream.example/feed.ts", "player", None)
        .await
        .unwrap();

    let response = reqwest::get(&ready.hls_url).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/x-mpegURL"
    );
    assert!(response.text().await.unwrap().starts_with("#EXTM3U"));

    manager.stop_transcode(None).await;
}

#[tokio::test]
async fn superseded_session_manifest_disappears_from_the_server() {
    let root = TempDir::new().unwrap();
    let (manager, _server) = spawn_manager(
        &root,
        SimulatedTranscoder::ready_after(Duration::from_millis(10)),
    )
    .await;

    let first = manager
        .start_transcode("http://upstream.example/one.ts", "player", None)
        .await
        .unwrap();
    let second = manager
        .start_transcode("http://upstream.example/two.ts", "player", None)
        .await
        .unwrap();
    assert_ne!(first.session_id, second.session_id);

    // One live session for the slot; the new manifest serves, the old 404s.
    assert_eq!(manager.registry().len(), 1);
    let response = reqwest::get(&second.hls_url).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let response = reqwest::get(&first.hls_url).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    manager.stop_transcode(None).await;
}

#[tokio::test]
async fn manifest_timeout_clears_the_slot() {
    let root = TempDir::new().unwrap();
    let (manager, _server) = spawn_manager(&root, SimulatedTranscoder::never_ready()).await;

    let result = manager
        .start_transcode("http://upstream.example/dead.ts", "player", None)
        .await;
    assert!(matches!(result, Err(TranscodeError::StartupTimeout { .. })));
    assert!(manager.registry().is_empty());
}

#[tokio::test]
async fn stop_all_removes_session_directories() {
    let root = TempDir::new().unwrap();
    let (manager, _server) = spawn_manager(
        &root,
        SimulatedTranscoder::ready_after(Duration::from_millis(10)),
    )
    .await;

    let ready = manager
        .start_transcode("http://upstream.example/feed.ts", "player", None)
        .await
        .unwrap();

    manager.stop_transcode(None).await;
    assert!(manager.registry().is_empty());

    let response = reqwest::get(&ready.hls_url).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn distinct_slots_run_side_by_side() {
    let root = TempDir::new().unwrap();
    let (manager, _server) = spawn_manager(
        &root,
        SimulatedTranscoder::ready_after(Duration::from_millis(10)),
    )
    .await;

    let pip_main = manager
        .start_transcode("http://upstream.example/main.ts", "main", None)
        .await
        .unwrap();
    let pip_secondary = manager
        .start_transcode("http://upstream.example/pip.ts", "pip", None)
        .await
        .unwrap();

    assert_eq!(manager.registry().len(), 2);
    for session in [&pip_main, &pip_secondary] {
        let response = reqwest::get(&session.hls_url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    manager.stop_transcode(Some("main")).await;
    assert_eq!(manager.registry().len(), 1);
    manager.stop_transcode(None).await;
}

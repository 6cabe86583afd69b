//! Playback orchestrator wired to the real proxy and transcode services.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use zaptv_core::config::{PlaybackConfig, ProxyConfig, TranscodeConfig};
use zaptv_core::player::{
    ExternalPlayerDelegate, MediaEvent, NoopExternalPlayer, OrchestratorDeps, PlayStrategy,
    PlayerEvent, SimulatedMediaController, SimulatedMediaElement, spawn_orchestrator,
};
use zaptv_core::playlist::{Channel, ContentType};
use zaptv_core::proxy::MediaProxy;
use zaptv_core::transcode::{SimulatedTranscoder, TranscodeManager};

fn test_playback_config() -> PlaybackConfig {
    PlaybackConfig {
        stall_timeout: Duration::from_millis(500),
        source_probe_timeout: Duration::from_millis(50),
        source_switch_delay: Duration::from_millis(10),
        auto_skip_delay: Duration::from_millis(40),
        ended_reload_delay: Duration::from_millis(10),
        poll_interval: Duration::from_millis(5),
        auto_skip_enabled: false,
        force_external: false,
    }
}

fn test_channel(sources: &[&str]) -> Channel {
    Channel {
        id: 7,
        name: "Pipeline Test".to_string(),
        logo_url: None,
        primary_url: sources[0].to_string(),
        sources: sources.iter().map(|s| s.to_string()).collect(),
        group: "Other".to_string(),
        content_type: ContentType::Live,
        user_agent: None,
        referrer: None,
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<PlayerEvent>) -> PlayerEvent {
    tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("timed out waiting for player event")
        .expect("event channel closed")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..600 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn media_slots() -> (
    [Box<dyn zaptv_core::player::MediaElement>; 2],
    SimulatedMediaController,
    SimulatedMediaController,
) {
    let (element0, slot0) = SimulatedMediaElement::new();
    let (element1, slot1) = SimulatedMediaElement::new();
    ([Box::new(element0), Box::new(element1)], slot0, slot1)
}

#[tokio::test]
async fn direct_playback_is_rewritten_through_the_proxy() {
    let proxy = Arc::new(
        MediaProxy::start(ProxyConfig {
            preferred_port: 39876,
            ..ProxyConfig::default()
        })
        .await
        .unwrap(),
    );
    let expected = proxy.proxied_url("http://upstream.example/feed.m3u8");

    let (slots, slot0, _slot1) = media_slots();
    let deps = OrchestratorDeps {
        transcode: None,
        proxy: Some(Arc::clone(&proxy)),
        external: Arc::new(NoopExternalPlayer) as Arc<dyn ExternalPlayerDelegate>,
        probe_client: reqwest::Client::new(),
    };
    let (handle, _events) = spawn_orchestrator(test_playback_config(), deps, slots);

    handle
        .play(test_channel(&["http://upstream.example/feed.m3u8"]))
        .await
        .unwrap();

    let observer = slot0.clone();
    wait_until(move || observer.attached_url().is_some()).await;
    assert_eq!(slot0.attached_url().as_deref(), Some(expected.as_str()));
}

#[tokio::test]
async fn transcoded_playback_attaches_the_session_manifest() {
    let root = TempDir::new().unwrap();
    let config = TranscodeConfig {
        preferred_hls_port: 39877,
        hls_root: root.path().to_path_buf(),
        kill_grace: Duration::from_millis(10),
        manifest_poll_interval: Duration::from_millis(10),
        manifest_timeout: Duration::from_millis(500),
        ..TranscodeConfig::default()
    };
    let (manager, _server) = TranscodeManager::start_with_server(
        config,
        Arc::new(SimulatedTranscoder::ready_after(Duration::from_millis(20))),
    )
    .await
    .unwrap();

    let (slots, slot0, _slot1) = media_slots();
    let deps = OrchestratorDeps {
        transcode: Some(Arc::new(manager)),
        proxy: None,
        external: Arc::new(NoopExternalPlayer) as Arc<dyn ExternalPlayerDelegate>,
        probe_client: reqwest::Client::new(),
    };
    let (handle, mut events) = spawn_orchestrator(test_playback_config(), deps, slots);

    handle
        .play(test_channel(&["http://upstream.example/feed.ts"]))
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut events).await,
        PlayerEvent::Loading {
            channel_id: 7,
            source_index: 0
        }
    );

    let observer = slot0.clone();
    wait_until(move || observer.attached_url().is_some()).await;
    let attached = slot0.attached_url().unwrap();
    assert!(attached.ends_with("/stream.m3u8"), "got {attached}");

    // The attached manifest must actually be fetchable.
    let response = reqwest::get(&attached).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    slot0.push_event(MediaEvent::Playing);
    assert_eq!(
        next_event(&mut events).await,
        PlayerEvent::Playing {
            channel_id: 7,
            strategy: PlayStrategy::FfmpegHls
        }
    );

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn transcode_spawn_failure_walks_the_mirror_list_then_fails() {
    let root = TempDir::new().unwrap();
    let config = TranscodeConfig {
        preferred_hls_port: 39878,
        hls_root: root.path().to_path_buf(),
        kill_grace: Duration::from_millis(10),
        manifest_poll_interval: Duration::from_millis(10),
        manifest_timeout: Duration::from_millis(200),
        ..TranscodeConfig::default()
    };
    let (manager, _server) =
        TranscodeManager::start_with_server(config, Arc::new(SimulatedTranscoder::failing_spawn()))
            .await
            .unwrap();

    let (slots, _slot0, _slot1) = media_slots();
    let deps = OrchestratorDeps {
        transcode: Some(Arc::new(manager)),
        proxy: None,
        external: Arc::new(NoopExternalPlayer) as Arc<dyn ExternalPlayerDelegate>,
        probe_client: reqwest::Client::new(),
    };
    let (handle, mut events) = spawn_orchestrator(test_playback_config(), deps, slots);

    handle
        .play(test_channel(&[
            "http://127.0.0.1:9/one.ts",
            "http://127.0.0.1:10/two.ts",
        ]))
        .await
        .unwrap();

    assert_eq!(
        next_event(&mut events).await,
        PlayerEvent::Loading {
            channel_id: 7,
            source_index: 0
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        PlayerEvent::SourceSwitched {
            source_index: 1,
            failover: false
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        PlayerEvent::Loading {
            channel_id: 7,
            source_index: 1
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        PlayerEvent::TerminalError {
            message: "All sources failed".to_string()
        }
    );
}

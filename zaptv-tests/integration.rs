//! Integration tests for Zaptv
//!
//! These tests verify the integration between different components of the
//! system: the media proxy in front of real upstreams, the transcode manager
//! with its segment server, and the playback orchestrator wired to both.

#[path = "integration/playlist_ingestion.rs"]
mod playlist_ingestion;

#[path = "integration/proxy_pipeline.rs"]
mod proxy_pipeline;

#[path = "integration/transcode_lifecycle.rs"]
mod transcode_lifecycle;

#[path = "integration/playback_pipeline.rs"]
mod playback_pipeline;

//! Centralized configuration for Zaptv.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Stable browser-like user agent presented to upstreams that reject
/// non-browser clients. Shared by the proxy and the transcoder spawn.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Central configuration for all Zaptv components.
///
/// Groups related configuration settings into logical sections.
#[derive(Debug, Clone, Default)]
pub struct ZaptvConfig {
    pub proxy: ProxyConfig,
    pub transcode: TranscodeConfig,
    pub playback: PlaybackConfig,
}

/// Media proxy configuration.
///
/// Controls the CORS-bypassing HTTP passthrough used for direct playback
/// and seeking support.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Preferred TCP port; the allocator probes upward from here
    pub preferred_port: u16,
    /// Upstream idle timeout: connect plus per-read inactivity, never a cap
    /// on how long a stream may flow
    pub upstream_timeout: Duration,
    /// User agent presented to upstream servers
    pub user_agent: &'static str,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            preferred_port: 9876,
            upstream_timeout: Duration::from_secs(60),
            user_agent: BROWSER_USER_AGENT,
        }
    }
}

/// Transcode session manager configuration.
///
/// Controls FFmpeg child-process lifecycle, HLS output layout and the
/// manifest readiness poll.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// Preferred TCP port for the HLS segment server
    pub preferred_hls_port: u16,
    /// Root directory for per-session HLS output
    pub hls_root: PathBuf,
    /// Pause after killing a superseded process, lets OS file handles release
    pub kill_grace: Duration,
    /// Interval between manifest readiness checks
    pub manifest_poll_interval: Duration,
    /// Give up waiting for the manifest after this long
    pub manifest_timeout: Duration,
    /// HLS segment duration in seconds
    pub segment_seconds: u32,
    /// Number of segments kept in the live playlist window
    pub playlist_window: u32,
    /// AAC bitrate for the re-encoded audio track
    pub audio_bitrate: &'static str,
    /// Bytes of stderr tail kept for failure diagnostics
    pub stderr_tail_bytes: usize,
    /// Directory where a downloaded FFmpeg build is installed
    pub install_dir: PathBuf,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        let temp = std::env::temp_dir();
        Self {
            preferred_hls_port: 9877,
            hls_root: temp.join(format!("zaptv-hls-{}", std::process::id())),
            kill_grace: Duration::from_millis(200),
            manifest_poll_interval: Duration::from_millis(500),
            manifest_timeout: Duration::from_secs(30),
            segment_seconds: 3,
            playlist_window: 10,
            audio_bitrate: "128k",
            stderr_tail_bytes: 500,
            install_dir: temp.join("zaptv-ffmpeg"),
        }
    }
}

/// Playback orchestration configuration.
///
/// Controls the failure ladder, source racing and the timers that drive
/// failover decisions.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// No forward progress for this long counts as a stall
    pub stall_timeout: Duration,
    /// Deadline for the concurrent mirror probes
    pub source_probe_timeout: Duration,
    /// Delay before restarting against the next mirror
    pub source_switch_delay: Duration,
    /// Countdown before auto-skip advances to the next channel
    pub auto_skip_delay: Duration,
    /// Delay before reloading a live stream that reported EOF
    pub ended_reload_delay: Duration,
    /// Interval of the buffer/volume supervision tick
    pub poll_interval: Duration,
    /// Whether auto-skip to the next channel is enabled
    pub auto_skip_enabled: bool,
    /// Always hand streams to the external player instead of playing in-app
    pub force_external: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(7),
            source_probe_timeout: Duration::from_secs(2),
            source_switch_delay: Duration::from_millis(500),
            auto_skip_delay: Duration::from_secs(3),
            ended_reload_delay: Duration::from_secs(1),
            poll_interval: Duration::from_millis(250),
            auto_skip_enabled: false,
            force_external: false,
        }
    }
}

//! Zaptv Core - IPTV stream session management and playback orchestration
//!
//! This crate provides the fundamental building blocks for IPTV playback:
//! playlist ingestion, a CORS-bypassing media proxy, an FFmpeg-backed
//! transcode session manager with an HLS segment server, and the client-side
//! playback orchestrator that drives source racing, dual-buffer failover and
//! the auto-retry ladder.

pub mod config;
pub mod net;
pub mod player;
pub mod playlist;
pub mod proxy;
pub mod tracing_setup;
pub mod transcode;

// Re-export main types for convenient access
pub use config::ZaptvConfig;
pub use player::{OrchestratorHandle, PlaybackError, spawn_orchestrator};
pub use playlist::{Channel, ContentType, Playlist, PlaylistError};
pub use proxy::ProxyError;
pub use transcode::{TranscodeError, TranscodeManager};

/// Core errors that can bubble up from any Zaptv subsystem.
///
/// High-level error types representing failures in core functionality.
#[derive(Debug, thiserror::Error)]
pub enum ZaptvError {
    #[error("Playlist error: {0}")]
    Playlist(#[from] PlaylistError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ZaptvError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ZaptvError::Playlist(e) => match e {
                PlaylistError::Empty => "Playlist contains no channels".to_string(),
                PlaylistError::Malformed { reason } => {
                    format!("Could not read playlist: {reason}")
                }
            },
            ZaptvError::Proxy(_) => "Stream proxy error occurred".to_string(),
            ZaptvError::Transcode(e) => match e {
                TranscodeError::TranscoderUnavailable => {
                    "FFmpeg is not installed. Install it or use the external player".to_string()
                }
                TranscodeError::StartupTimeout { .. } => {
                    "Stream took too long to start. Try another source".to_string()
                }
                _ => "Transcoding error occurred".to_string(),
            },
            ZaptvError::Playback(e) => match e {
                PlaybackError::AllSourcesFailed => {
                    "All sources failed. Try the external player".to_string()
                }
                _ => "Playback error occurred".to_string(),
            },
            ZaptvError::Configuration { .. } => "Configuration error occurred".to_string(),
            ZaptvError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ZaptvError::Configuration { .. } | ZaptvError::Playlist(PlaylistError::Malformed { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, ZaptvError>;

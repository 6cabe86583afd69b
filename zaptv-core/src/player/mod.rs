//! Playback orchestration actor.
//!
//! The orchestrator owns two media-element slots and drives a channel through
//! its playback lifecycle: strategy selection, source racing, dual-buffer
//! failover and the retry ladder. Commands go in through
//! [`OrchestratorHandle`]; observable state changes come back out as
//! [`PlayerEvent`]s.
//!
//! Media output is abstracted behind the [`MediaElement`] capability trait so
//! the same orchestration logic runs against any frontend, and against
//! simulated elements in tests.

mod commands;
mod external;
mod handle;
mod media;
mod orchestrator;
mod race;

pub use commands::{PlayStrategy, PlaybackStatus, PlayerCommand, PlayerEvent};
pub use external::{ExternalPlayerDelegate, LaunchOptions, NoopExternalPlayer, SystemExternalPlayer};
pub use handle::OrchestratorHandle;
pub use media::{MediaError, MediaEvent, MediaElement, StreamFormat};
#[cfg(any(test, feature = "test-utils"))]
pub use media::{SimulatedMediaController, SimulatedMediaElement};
pub use orchestrator::{OrchestratorDeps, spawn_orchestrator};
pub use race::select_best_source;

/// Errors surfaced by the playback orchestrator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlaybackError {
    #[error("All sources failed")]
    AllSourcesFailed,

    #[error("Media element error: {reason}")]
    Media { reason: String },

    #[error("Stream format not supported: {reason}")]
    FormatUnsupported { reason: String },

    #[error("Stream stalled with no progress")]
    Stalled,

    #[error("External player launch failed: {reason}")]
    ExternalLaunchFailed { reason: String },

    #[error("No channel loaded")]
    NoChannel,

    #[error("Playback orchestrator is shutting down")]
    Shutdown,
}

impl PlaybackError {
    /// Whether the retry ladder should attempt another source for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlaybackError::Media { .. } | PlaybackError::Stalled
        )
    }
}

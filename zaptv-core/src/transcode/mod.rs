//! FFmpeg transcode session management.
//!
//! Converts arbitrary input streams (raw MPEG-TS over TCP, containers the
//! in-app demuxers cannot handle) into short-window segmented HLS by driving
//! an external FFmpeg process, and serves the resulting segments over a
//! loopback HTTP server.
//!
//! Session identity is the heart of this module: every start allocates a
//! globally monotonic session id, a new session for a slot fully stops its
//! predecessor before its own manifest poll begins, and every in-flight wait
//! re-checks "am I still the current session for my slot" so a superseded
//! start resolves as a benign cancellation instead of handing out a stale
//! HLS URL.

mod binary;
mod manager;
mod registry;
mod segment_server;

pub use binary::{DownloadProgress, DownloadStatus, FfmpegInstaller, TranscoderStatus};
pub use manager::{ReadySession, SpawnRequest, SystemTranscoder, TranscodeManager, Transcoder};
pub use registry::{ActiveSession, SessionRegistry};
pub use segment_server::SegmentServer;

#[cfg(any(test, feature = "test-utils"))]
pub use manager::SimulatedTranscoder;

/// Errors produced by the transcode subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    /// No usable FFmpeg binary. Terminal and user-actionable.
    #[error("FFmpeg not available")]
    TranscoderUnavailable,

    /// The child process could not be spawned or exited before the manifest
    /// ever appeared. Retryable up to the orchestrator's cap.
    #[error("FFmpeg exited: {stderr_tail}")]
    ProcessFailed { stderr_tail: String },

    /// The manifest never reached non-zero size within the startup window.
    #[error("Timeout waiting for stream: {stderr_tail}")]
    StartupTimeout { stderr_tail: String },

    /// A newer session claimed this slot while we were starting. Benign race
    /// outcome, must never surface to the user.
    #[error("Session cancelled")]
    Superseded,

    /// Download or install of the FFmpeg build failed.
    #[error("FFmpeg install failed: {reason}")]
    InstallFailed { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    /// True for failures worth another attempt at this layer's caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TranscodeError::ProcessFailed { .. } | TranscodeError::StartupTimeout { .. }
        )
    }
}

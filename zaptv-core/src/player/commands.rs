//! Command and event definitions for the playback orchestrator actor.

use tokio::sync::oneshot;

use super::PlaybackError;
use crate::playlist::Channel;

/// Commands accepted by the orchestrator actor.
///
/// Each command carries its own response channel where a reply is expected.
/// The actor processes commands sequentially, which is what makes the retry
/// ladder's state transitions race-free.
pub enum PlayerCommand {
    /// Start playing a channel, superseding whatever is playing now.
    Play {
        channel: Channel,
        responder: oneshot::Sender<Result<(), PlaybackError>>,
    },
    /// Stop playback and detach both slots.
    Stop {
        responder: oneshot::Sender<()>,
    },
    /// Set output volume on the active slot.
    SetVolume { volume: f64 },
    /// Mute or unmute the active slot.
    SetMuted { muted: bool },
    /// Snapshot of current playback state.
    Status {
        responder: oneshot::Sender<PlaybackStatus>,
    },
    /// Shut the actor down gracefully.
    Shutdown { responder: oneshot::Sender<()> },
}

/// How a play attempt reaches the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayStrategy {
    /// Handed off to an external player process.
    External,
    /// Transcoded to HLS by the local FFmpeg session.
    FfmpegHls,
    /// Proxied straight to the element as HLS.
    DirectHls,
    /// Proxied straight to the element as raw MPEG-TS.
    MpegTs,
}

/// Observable state changes, emitted on the event channel returned by
/// [`spawn_orchestrator`](super::spawn_orchestrator).
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// A play attempt started for this source.
    Loading {
        channel_id: u32,
        source_index: usize,
    },
    /// Playback is rolling.
    Playing {
        channel_id: u32,
        strategy: PlayStrategy,
    },
    /// The retry ladder moved playback to another source.
    SourceSwitched {
        source_index: usize,
        /// True when the standby buffer took over without a restart.
        failover: bool,
    },
    /// The stream was handed to an external player.
    ExternalLaunched { url: String },
    /// Every source failed; playback on this channel is over.
    TerminalError { message: String },
    /// Auto-skip fired; the frontend should advance to the next channel,
    /// wrapping at the end of its list.
    SkipToNext,
}

/// Current playback state, as returned by a `Status` query.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStatus {
    pub channel_id: Option<u32>,
    pub source_index: usize,
    pub strategy: Option<PlayStrategy>,
    pub playing: bool,
    pub volume: f64,
    pub muted: bool,
}

//! Handle for communicating with the playback orchestrator actor.

use tokio::sync::{mpsc, oneshot};

use super::PlaybackError;
use super::commands::{PlaybackStatus, PlayerCommand};
use crate::playlist::Channel;

/// Cloneable async API over the orchestrator actor.
#[derive(Clone)]
pub struct OrchestratorHandle {
    sender: mpsc::Sender<PlayerCommand>,
}

impl OrchestratorHandle {
    pub(super) fn new(sender: mpsc::Sender<PlayerCommand>) -> Self {
        Self { sender }
    }

    /// Starts playback of a channel, superseding any current playback.
    ///
    /// Resolves as soon as the play attempt is underway; progress and
    /// failures arrive on the event channel.
    ///
    /// # Errors
    ///
    /// - `PlaybackError::Shutdown` - The actor is gone
    /// - `PlaybackError::ExternalLaunchFailed` - External strategy chosen
    ///   but no player could be spawned
    pub async fn play(&self, channel: Channel) -> Result<(), PlaybackError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(PlayerCommand::Play { channel, responder })
            .await
            .map_err(|_| PlaybackError::Shutdown)?;
        rx.await.map_err(|_| PlaybackError::Shutdown)?
    }

    /// Stops playback and detaches both media slots.
    ///
    /// # Errors
    ///
    /// - `PlaybackError::Shutdown` - The actor is gone
    pub async fn stop(&self) -> Result<(), PlaybackError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(PlayerCommand::Stop { responder })
            .await
            .map_err(|_| PlaybackError::Shutdown)?;
        rx.await.map_err(|_| PlaybackError::Shutdown)
    }

    /// Sets output volume on the active slot only.
    ///
    /// # Errors
    ///
    /// - `PlaybackError::Shutdown` - The actor is gone
    pub async fn set_volume(&self, volume: f64) -> Result<(), PlaybackError> {
        self.sender
            .send(PlayerCommand::SetVolume { volume })
            .await
            .map_err(|_| PlaybackError::Shutdown)
    }

    /// Mutes or unmutes the active slot.
    ///
    /// # Errors
    ///
    /// - `PlaybackError::Shutdown` - The actor is gone
    pub async fn set_muted(&self, muted: bool) -> Result<(), PlaybackError> {
        self.sender
            .send(PlayerCommand::SetMuted { muted })
            .await
            .map_err(|_| PlaybackError::Shutdown)
    }

    /// Snapshot of the current playback state.
    ///
    /// # Errors
    ///
    /// - `PlaybackError::Shutdown` - The actor is gone
    pub async fn status(&self) -> Result<PlaybackStatus, PlaybackError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(PlayerCommand::Status { responder })
            .await
            .map_err(|_| PlaybackError::Shutdown)?;
        rx.await.map_err(|_| PlaybackError::Shutdown)
    }

    /// Shuts the actor down, waiting for it to acknowledge.
    ///
    /// # Errors
    ///
    /// - `PlaybackError::Shutdown` - The actor is already gone
    pub async fn shutdown(&self) -> Result<(), PlaybackError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(PlayerCommand::Shutdown { responder })
            .await
            .map_err(|_| PlaybackError::Shutdown)?;
        rx.await.map_err(|_| PlaybackError::Shutdown)
    }
}

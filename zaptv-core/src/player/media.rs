//! Media element capability trait and simulated implementation.

use async_trait::async_trait;

use super::PlaybackError;

/// Container format the element is asked to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// HLS manifest, native or via a playback library.
    Hls,
    /// Raw MPEG-TS, used as the fallback when HLS demuxing rejects a feed.
    MpegTs,
}

/// Fatal media errors reported by an element, mirroring the HTML media
/// error codes the orchestration logic was designed around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaError {
    /// Fetching the stream failed mid-playback.
    Network,
    /// The decoder choked on the stream.
    Decode,
    /// The source format is not supported by this element.
    Format,
    /// Playback was aborted by the element itself.
    Aborted,
}

/// Events an element surfaces to the orchestrator between polls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaEvent {
    /// First frame rendered, playback is underway.
    Playing,
    /// The stream reached its end. For live feeds this means the upstream
    /// segment producer stopped, not a deliberate finish.
    Ended,
    /// A fatal error. The element is dead until re-attached.
    Error(MediaError),
}

/// Capability trait for a single playback surface.
///
/// The orchestrator owns two of these (active and standby) and never assumes
/// anything about what is behind them. Implementations must be cheap to poll;
/// the orchestrator ticks every couple hundred milliseconds.
#[async_trait]
pub trait MediaElement: Send {
    /// Attaches a stream URL in the given format. Implicitly detaches any
    /// previous stream.
    ///
    /// # Errors
    ///
    /// - `PlaybackError::Media` - The element could not begin loading
    /// - `PlaybackError::FormatUnsupported` - The element rejects the format
    async fn attach(&mut self, url: &str, format: StreamFormat) -> Result<(), PlaybackError>;

    /// Detaches the current stream and releases decode resources.
    async fn detach(&mut self);

    /// Requests playback start on the attached stream.
    ///
    /// # Errors
    ///
    /// - `PlaybackError::Media` - Playback could not start
    async fn play(&mut self) -> Result<(), PlaybackError>;

    /// Sets output volume in `0.0..=1.0`.
    fn set_volume(&mut self, volume: f64);

    /// Mutes or unmutes output.
    fn set_muted(&mut self, muted: bool);

    /// Seconds of media buffered ahead of the playhead.
    fn buffered_seconds(&self) -> f64;

    /// Current playhead position in seconds. Advances while playing; a
    /// frozen position is how stalls are detected.
    fn position(&self) -> f64;

    /// Drains the next pending event, if any.
    fn poll_event(&mut self) -> Option<MediaEvent>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use simulated::{SimulatedMediaController, SimulatedMediaElement};

#[cfg(any(test, feature = "test-utils"))]
mod simulated {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{MediaElement, MediaEvent, StreamFormat};
    use crate::player::PlaybackError;

    #[derive(Debug, Default)]
    struct SimState {
        attached_url: Option<String>,
        attached_format: Option<StreamFormat>,
        playing: bool,
        volume: f64,
        muted: bool,
        buffered: f64,
        position: f64,
        events: VecDeque<MediaEvent>,
        attach_error: Option<PlaybackError>,
        attach_count: u32,
    }

    /// Scriptable media element for tests. All state lives behind a shared
    /// controller so a test can observe and drive the element after it has
    /// been moved into the orchestrator.
    pub struct SimulatedMediaElement {
        state: Arc<Mutex<SimState>>,
    }

    /// Test-side handle to a [`SimulatedMediaElement`].
    #[derive(Clone)]
    pub struct SimulatedMediaController {
        state: Arc<Mutex<SimState>>,
    }

    impl SimulatedMediaElement {
        pub fn new() -> (Self, SimulatedMediaController) {
            let state = Arc::new(Mutex::new(SimState {
                volume: 1.0,
                ..SimState::default()
            }));
            (
                Self {
                    state: Arc::clone(&state),
                },
                SimulatedMediaController { state },
            )
        }
    }

    impl SimulatedMediaController {
        /// Queues an event for the orchestrator's next poll.
        pub fn push_event(&self, event: MediaEvent) {
            self.state.lock().events.push_back(event);
        }

        /// Makes the next `attach` call fail with the given error.
        pub fn fail_next_attach(&self, error: PlaybackError) {
            self.state.lock().attach_error = Some(error);
        }

        /// Sets the buffered-ahead duration the element reports.
        pub fn set_buffered(&self, seconds: f64) {
            self.state.lock().buffered = seconds;
        }

        /// Advances the playhead, as decoded frames would.
        pub fn advance_position(&self, seconds: f64) {
            self.state.lock().position += seconds;
        }

        pub fn attached_url(&self) -> Option<String> {
            self.state.lock().attached_url.clone()
        }

        pub fn attached_format(&self) -> Option<StreamFormat> {
            self.state.lock().attached_format
        }

        pub fn is_playing(&self) -> bool {
            self.state.lock().playing
        }

        pub fn volume(&self) -> f64 {
            self.state.lock().volume
        }

        pub fn is_muted(&self) -> bool {
            self.state.lock().muted
        }

        pub fn attach_count(&self) -> u32 {
            self.state.lock().attach_count
        }
    }

    #[async_trait]
    impl MediaElement for SimulatedMediaElement {
        async fn attach(&mut self, url: &str, format: StreamFormat) -> Result<(), PlaybackError> {
            let mut state = self.state.lock();
            state.attach_count += 1;
            if let Some(error) = state.attach_error.take() {
                return Err(error);
            }
            state.attached_url = Some(url.to_string());
            state.attached_format = Some(format);
            state.playing = false;
            state.position = 0.0;
            state.buffered = 0.0;
            Ok(())
        }

        async fn detach(&mut self) {
            let mut state = self.state.lock();
            state.attached_url = None;
            state.attached_format = None;
            state.playing = false;
            state.buffered = 0.0;
            state.position = 0.0;
            state.events.clear();
        }

        async fn play(&mut self) -> Result<(), PlaybackError> {
            let mut state = self.state.lock();
            if state.attached_url.is_none() {
                return Err(PlaybackError::Media {
                    reason: "play without attached stream".to_string(),
                });
            }
            state.playing = true;
            Ok(())
        }

        fn set_volume(&mut self, volume: f64) {
            self.state.lock().volume = volume;
        }

        fn set_muted(&mut self, muted: bool) {
            self.state.lock().muted = muted;
        }

        fn buffered_seconds(&self) -> f64 {
            self.state.lock().buffered
        }

        fn position(&self) -> f64 {
            self.state.lock().position
        }

        fn poll_event(&mut self) -> Option<MediaEvent> {
            self.state.lock().events.pop_front()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_element_tracks_attach_and_play() {
        let (mut element, controller) = SimulatedMediaElement::new();

        element
            .attach("http://127.0.0.1:9876/stream?url=x", StreamFormat::Hls)
            .await
            .unwrap();
        element.play().await.unwrap();

        assert!(controller.is_playing());
        assert_eq!(controller.attached_format(), Some(StreamFormat::Hls));

        element.detach().await;
        assert!(!controller.is_playing());
        assert_eq!(controller.attached_url(), None);
    }

    #[tokio::test]
    async fn simulated_element_play_without_attach_fails() {
        let (mut element, _controller) = SimulatedMediaElement::new();
        assert!(element.play().await.is_err());
    }

    #[tokio::test]
    async fn scripted_attach_failure_fires_once() {
        let (mut element, controller) = SimulatedMediaElement::new();
        controller.fail_next_attach(PlaybackError::FormatUnsupported {
            reason: "no demuxer".to_string(),
        });

        assert!(
            element
                .attach("http://example.com/a.ts", StreamFormat::MpegTs)
                .await
                .is_err()
        );
        assert!(
            element
                .attach("http://example.com/a.ts", StreamFormat::MpegTs)
                .await
                .is_ok()
        );
    }
}

//! Actor implementation of the playback orchestrator.
//!
//! One task owns both media slots and all retry state. Commands arrive on a
//! bounded channel, internal timers and background results on an unbounded
//! one, and a periodic tick drives media-event polling and stall detection.
//!
//! Every transition that starts a new play attempt bumps an attempt counter.
//! Timers and background tasks carry the counter they were spawned under and
//! are ignored when it no longer matches, which is how a transition cancels
//! everything pending from the previous attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::commands::{PlayStrategy, PlaybackStatus, PlayerCommand, PlayerEvent};
use super::external::{ExternalPlayerDelegate, LaunchOptions};
use super::handle::OrchestratorHandle;
use super::media::{MediaElement, MediaError, MediaEvent, StreamFormat};
use super::race::select_best_source;
use crate::config::PlaybackConfig;
use crate::playlist::Channel;
use crate::proxy::MediaProxy;
use crate::transcode::{ReadySession, TranscodeError, TranscodeManager};

/// Containers the in-app pipeline hands to the external player. `mp4` and
/// `webm` stay in-app.
const EXTERNAL_CONTAINERS: &[&str] = &["mkv", "avi", "wmv", "mov", "flv"];

/// Transcode slot identity for the single playback surface. Rapid channel
/// zaps all target this slot, so each start supersedes the previous one.
const TRANSCODE_SLOT: &str = "player";

/// Collaborators injected into the orchestrator at spawn time.
pub struct OrchestratorDeps {
    /// Transcode manager, when FFmpeg playback is available at all.
    pub transcode: Option<Arc<TranscodeManager>>,
    /// Media proxy for direct playback. Without it, sources attach raw.
    pub proxy: Option<Arc<MediaProxy>>,
    /// Delegate for streams that must leave the app.
    pub external: Arc<dyn ExternalPlayerDelegate>,
    /// Client used for source-race HEAD probes.
    pub probe_client: reqwest::Client,
}

enum InternalEvent {
    Timer {
        attempt: u64,
        kind: TimerKind,
    },
    SourceRaced {
        attempt: u64,
        source_index: usize,
    },
    TranscodeFinished {
        attempt: u64,
        result: Result<ReadySession, TranscodeError>,
    },
}

#[derive(Debug, Clone, Copy)]
enum TimerKind {
    RestartDelay,
    AutoSkip,
    EndedReload,
}

/// Spawns the orchestrator actor.
///
/// Returns the command handle and the event stream. Dropping the receiver is
/// fine; events are then discarded.
pub fn spawn_orchestrator(
    config: PlaybackConfig,
    deps: OrchestratorDeps,
    slots: [Box<dyn MediaElement>; 2],
) -> (OrchestratorHandle, mpsc::UnboundedReceiver<PlayerEvent>) {
    let (sender, receiver) = mpsc::channel(100);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();

    let orchestrator = Orchestrator {
        config,
        deps,
        slots,
        active_slot: 0,
        events: event_tx,
        internal_tx,
        attempt: 0,
        channel: None,
        source_index: 0,
        strategy: None,
        attached: false,
        playing: false,
        volume: 1.0,
        muted: false,
        standby_source: None,
        transcode_attempted: false,
        mpegts_fallback: false,
        consecutive_failures: 0,
        last_position: 0.0,
        last_progress: Instant::now(),
    };

    tokio::spawn(async move {
        run_actor_loop(orchestrator, receiver, internal_rx).await;
    });

    (OrchestratorHandle::new(sender), event_rx)
}

async fn run_actor_loop(
    mut orchestrator: Orchestrator,
    mut receiver: mpsc::Receiver<PlayerCommand>,
    mut internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
) {
    debug!("Playback orchestrator started");
    let mut tick = tokio::time::interval(orchestrator.config.poll_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = receiver.recv() => {
                match command {
                    Some(command) => {
                        if !orchestrator.handle_command(command).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            Some(event) = internal_rx.recv() => {
                orchestrator.handle_internal(event).await;
            }
            _ = tick.tick() => {
                orchestrator.poll_media().await;
            }
        }
    }

    debug!("Playback orchestrator stopped");
}

struct Orchestrator {
    config: PlaybackConfig,
    deps: OrchestratorDeps,
    slots: [Box<dyn MediaElement>; 2],
    active_slot: usize,
    events: mpsc::UnboundedSender<PlayerEvent>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    attempt: u64,
    channel: Option<Channel>,
    source_index: usize,
    strategy: Option<PlayStrategy>,
    attached: bool,
    playing: bool,
    volume: f64,
    muted: bool,
    /// Source index the standby slot is pre-buffering, when armed.
    standby_source: Option<usize>,
    /// Set once a play attempt went through the transcoder; wrapping the
    /// mirror list back to index 0 after that is terminal.
    transcode_attempted: bool,
    /// The current source fell back from HLS to raw MPEG-TS.
    mpegts_fallback: bool,
    /// Failures since the last successful `Playing`. A full lap over the
    /// mirror list without one is terminal.
    consecutive_failures: usize,
    last_position: f64,
    last_progress: Instant,
}

impl Orchestrator {
    /// Returns false when the actor should shut down.
    async fn handle_command(&mut self, command: PlayerCommand) -> bool {
        match command {
            PlayerCommand::Play { channel, responder } => {
                let result = self.start_channel(channel).await;
                let _ = responder.send(result);
            }
            PlayerCommand::Stop { responder } => {
                self.stop_playback().await;
                let _ = responder.send(());
            }
            PlayerCommand::SetVolume { volume } => {
                self.volume = volume.clamp(0.0, 1.0);
                let volume = self.volume;
                self.slots[self.active_slot].set_volume(volume);
            }
            PlayerCommand::SetMuted { muted } => {
                self.muted = muted;
                self.slots[self.active_slot].set_muted(muted);
            }
            PlayerCommand::Status { responder } => {
                let _ = responder.send(PlaybackStatus {
                    channel_id: self.channel.as_ref().map(|c| c.id),
                    source_index: self.source_index,
                    strategy: self.strategy,
                    playing: self.playing,
                    volume: self.volume,
                    muted: self.muted,
                });
            }
            PlayerCommand::Shutdown { responder } => {
                self.stop_playback().await;
                let _ = responder.send(());
                return false;
            }
        }
        true
    }

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::Timer { attempt, kind } => {
                if attempt != self.attempt {
                    return;
                }
                match kind {
                    TimerKind::RestartDelay | TimerKind::EndedReload => {
                        self.begin_source_attempt().await;
                    }
                    TimerKind::AutoSkip => {
                        let _ = self.events.send(PlayerEvent::SkipToNext);
                    }
                }
            }
            InternalEvent::SourceRaced {
                attempt,
                source_index,
            } => {
                if attempt != self.attempt {
                    return;
                }
                self.source_index = source_index;
                self.begin_source_attempt().await;
            }
            InternalEvent::TranscodeFinished { attempt, result } => {
                if attempt != self.attempt {
                    // Continuing anyway would attach a session that a newer
                    // start already superseded.
                    return;
                }
                match result {
                    Ok(ready) => self.attach_stream(&ready.hls_url, StreamFormat::Hls).await,
                    Err(TranscodeError::Superseded) => {
                        debug!("Transcode start superseded, ignoring");
                    }
                    Err(e) => {
                        warn!("Transcode failed: {e}");
                        self.handle_failure(&e.to_string()).await;
                    }
                }
            }
        }
    }

    /// Entry point for a `Play` command. Resets all retry state, then either
    /// delegates to the external player or kicks off the in-app pipeline.
    async fn start_channel(&mut self, channel: Channel) -> Result<(), super::PlaybackError> {
        self.attempt += 1;
        self.detach_all().await;
        self.source_index = 0;
        self.strategy = None;
        self.transcode_attempted = false;
        self.mpegts_fallback = false;
        self.consecutive_failures = 0;
        self.standby_source = None;

        info!("Playing channel {} ({})", channel.id, channel.name);

        if self.config.force_external || has_external_container(&channel.primary_url) {
            let options = LaunchOptions {
                user_agent: channel.user_agent.clone(),
                referrer: channel.referrer.clone(),
            };
            self.deps.external.open(&channel.primary_url, &options)?;
            let _ = self.events.send(PlayerEvent::ExternalLaunched {
                url: channel.primary_url.clone(),
            });
            self.strategy = Some(PlayStrategy::External);
            self.channel = Some(channel);
            return Ok(());
        }

        let race_needed = channel.sources.len() >= 2;
        self.channel = Some(channel.clone());
        if race_needed {
            let client = self.deps.probe_client.clone();
            let sources = channel.sources.clone();
            let probe_timeout = self.config.source_probe_timeout;
            let tx = self.internal_tx.clone();
            let attempt = self.attempt;
            tokio::spawn(async move {
                let source_index = select_best_source(&client, &sources, probe_timeout).await;
                let _ = tx.send(InternalEvent::SourceRaced {
                    attempt,
                    source_index,
                });
            });
        } else {
            self.begin_source_attempt().await;
        }
        Ok(())
    }

    /// Starts (or restarts) playback of the current source through whichever
    /// strategy applies.
    async fn begin_source_attempt(&mut self) {
        let Some(channel) = self.channel.clone() else {
            return;
        };
        let _ = self.events.send(PlayerEvent::Loading {
            channel_id: channel.id,
            source_index: self.source_index,
        });
        self.attached = false;
        self.playing = false;
        self.standby_source = None;
        self.detach_all().await;

        let transcoder = self
            .deps
            .transcode
            .as_ref()
            .filter(|manager| manager.status().available)
            .map(Arc::clone);

        if let Some(manager) = transcoder {
            self.strategy = Some(PlayStrategy::FfmpegHls);
            self.transcode_attempted = true;
            let stream_url = channel.sources[self.source_index].clone();
            let user_agent = channel.user_agent.clone();
            let tx = self.internal_tx.clone();
            let attempt = self.attempt;
            tokio::spawn(async move {
                let result = manager
                    .start_transcode(&stream_url, TRANSCODE_SLOT, user_agent.as_deref())
                    .await;
                let _ = tx.send(InternalEvent::TranscodeFinished { attempt, result });
            });
        } else {
            let source = channel.sources[self.source_index].clone();
            let target = self.playback_url(&source);
            let format = if self.mpegts_fallback {
                StreamFormat::MpegTs
            } else {
                StreamFormat::Hls
            };
            self.strategy = Some(if self.mpegts_fallback {
                PlayStrategy::MpegTs
            } else {
                PlayStrategy::DirectHls
            });
            self.attach_stream(&target, format).await;
        }
    }

    /// Attaches the active slot to a ready-to-play URL, falling back from
    /// HLS to raw MPEG-TS when the element rejects the container outright.
    async fn attach_stream(&mut self, url: &str, format: StreamFormat) {
        let mut format = format;
        loop {
            let active = self.active_slot;
            match self.slots[active].attach(url, format).await {
                Ok(()) => break,
                Err(super::PlaybackError::FormatUnsupported { reason })
                    if format == StreamFormat::Hls && self.strategy != Some(PlayStrategy::FfmpegHls) =>
                {
                    debug!("HLS attach rejected ({reason}), falling back to MPEG-TS");
                    self.mpegts_fallback = true;
                    format = StreamFormat::MpegTs;
                }
                Err(e) => {
                    self.handle_failure(&e.to_string()).await;
                    return;
                }
            }
        }

        if self.strategy != Some(PlayStrategy::FfmpegHls) {
            self.strategy = Some(if format == StreamFormat::MpegTs {
                PlayStrategy::MpegTs
            } else {
                PlayStrategy::DirectHls
            });
        }

        let (volume, muted) = (self.volume, self.muted);
        let active = self.active_slot;
        self.slots[active].set_volume(volume);
        self.slots[active].set_muted(muted);
        if let Err(e) = self.slots[active].play().await {
            self.handle_failure(&e.to_string()).await;
            return;
        }

        self.attached = true;
        self.reset_stall_tracking();

        if self.strategy != Some(PlayStrategy::FfmpegHls) {
            self.arm_standby().await;
        }
    }

    /// Pre-buffers the next mirror on the inactive slot, silenced. Direct
    /// playback only; best-effort.
    async fn arm_standby(&mut self) {
        let Some(channel) = self.channel.clone() else {
            return;
        };
        if channel.sources.len() < 2 {
            return;
        }
        let standby_index = (self.source_index + 1) % channel.sources.len();
        let target = self.playback_url(&channel.sources[standby_index]);
        let slot = 1 - self.active_slot;

        self.slots[slot].set_muted(true);
        self.slots[slot].set_volume(0.0);
        let armed = self.slots[slot].attach(&target, StreamFormat::Hls).await.is_ok()
            && self.slots[slot].play().await.is_ok();
        if armed {
            self.standby_source = Some(standby_index);
        } else {
            self.slots[slot].detach().await;
            self.standby_source = None;
        }
    }

    /// The retry ladder. Standby failover first, then the next mirror, then
    /// a terminal error with optional auto-skip.
    async fn handle_failure(&mut self, reason: &str) {
        let Some(channel) = self.channel.clone() else {
            return;
        };
        warn!(
            "Playback failure on channel {} source {}: {reason}",
            channel.id, self.source_index
        );
        self.attempt += 1;
        self.attached = false;
        self.playing = false;

        // Rung 1: a buffered standby takes over without a restart.
        let standby_slot = 1 - self.active_slot;
        if matches!(
            self.strategy,
            Some(PlayStrategy::DirectHls | PlayStrategy::MpegTs)
        ) && let Some(standby_index) = self.standby_source
            && self.slots[standby_slot].buffered_seconds() > 0.0
        {
            let old = self.active_slot;
            self.active_slot = standby_slot;
            self.source_index = standby_index;
            self.standby_source = None;
            self.consecutive_failures = 0;
            self.mpegts_fallback = false;

            let (volume, muted) = (self.volume, self.muted);
            self.slots[standby_slot].set_volume(volume);
            self.slots[standby_slot].set_muted(muted);
            self.slots[old].set_volume(0.0);
            self.slots[old].set_muted(true);
            self.slots[old].detach().await;

            self.attached = true;
            self.playing = true;
            self.reset_stall_tracking();
            info!("Failed over to standby source {standby_index}");
            let _ = self.events.send(PlayerEvent::SourceSwitched {
                source_index: standby_index,
                failover: true,
            });
            self.arm_standby().await;
            return;
        }

        // Rung 2: advance through the mirror list with a short delay.
        let source_count = channel.sources.len();
        if source_count > 1 {
            self.consecutive_failures += 1;
            let next = (self.source_index + 1) % source_count;
            let exhausted = self.consecutive_failures >= source_count
                || (next == 0 && self.transcode_attempted);
            if !exhausted {
                self.source_index = next;
                self.mpegts_fallback = false;
                let _ = self.events.send(PlayerEvent::SourceSwitched {
                    source_index: next,
                    failover: false,
                });
                self.schedule_timer(TimerKind::RestartDelay, self.config.source_switch_delay);
                return;
            }
        }

        // Rung 3: out of options.
        self.terminal_error("All sources failed").await;
    }

    async fn terminal_error(&mut self, message: &str) {
        self.attempt += 1;
        self.detach_all().await;
        self.attached = false;
        self.playing = false;
        self.standby_source = None;
        let _ = self.events.send(PlayerEvent::TerminalError {
            message: message.to_string(),
        });
        if self.config.auto_skip_enabled {
            self.schedule_timer(TimerKind::AutoSkip, self.config.auto_skip_delay);
        }
    }

    async fn stop_playback(&mut self) {
        self.attempt += 1;
        if self.strategy == Some(PlayStrategy::FfmpegHls)
            && let Some(manager) = &self.deps.transcode
        {
            let manager = Arc::clone(manager);
            tokio::spawn(async move {
                manager.stop_transcode(Some(TRANSCODE_SLOT)).await;
            });
        }
        self.detach_all().await;
        self.channel = None;
        self.strategy = None;
        self.attached = false;
        self.playing = false;
        self.standby_source = None;
    }

    /// A tick: drain media events from both slots, then check for stalls.
    async fn poll_media(&mut self) {
        if self.channel.is_none() {
            return;
        }

        let active = self.active_slot;
        while let Some(event) = self.slots[active].poll_event() {
            match event {
                MediaEvent::Playing => {
                    if self.attached && !self.playing {
                        self.playing = true;
                        self.consecutive_failures = 0;
                        self.reset_stall_tracking();
                        if let (Some(channel), Some(strategy)) = (&self.channel, self.strategy) {
                            let _ = self.events.send(PlayerEvent::Playing {
                                channel_id: channel.id,
                                strategy,
                            });
                        }
                    }
                }
                MediaEvent::Ended => {
                    if self.attached {
                        info!("Stream ended, reloading shortly");
                        self.playing = false;
                        self.attempt += 1;
                        self.schedule_timer(TimerKind::EndedReload, self.config.ended_reload_delay);
                    }
                }
                MediaEvent::Error(kind) => {
                    if !self.attached {
                        continue;
                    }
                    if kind == MediaError::Format
                        && self.strategy == Some(PlayStrategy::DirectHls)
                    {
                        // Container problem, not a source problem. Switch
                        // demuxing strategy and retry the same source.
                        debug!("HLS playback rejected the feed, retrying as MPEG-TS");
                        self.attempt += 1;
                        self.mpegts_fallback = true;
                        self.begin_source_attempt().await;
                    } else {
                        self.handle_failure(&format!("media error: {kind:?}")).await;
                    }
                    return;
                }
            }
        }

        let standby = 1 - self.active_slot;
        while let Some(event) = self.slots[standby].poll_event() {
            if let MediaEvent::Error(_) = event {
                debug!("Standby source failed, disarming");
                self.slots[standby].detach().await;
                self.standby_source = None;
            }
        }

        if self.attached {
            let position = self.slots[self.active_slot].position();
            if position > self.last_position + 1e-3 {
                self.last_position = position;
                self.last_progress = Instant::now();
            } else if self.last_progress.elapsed() >= self.config.stall_timeout {
                self.handle_failure("no playback progress").await;
            }
        }
    }

    fn playback_url(&self, source: &str) -> String {
        match &self.deps.proxy {
            Some(proxy) => proxy.proxied_url(source),
            None => source.to_string(),
        }
    }

    fn schedule_timer(&self, kind: TimerKind, delay: Duration) {
        let tx = self.internal_tx.clone();
        let attempt = self.attempt;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(InternalEvent::Timer { attempt, kind });
        });
    }

    fn reset_stall_tracking(&mut self) {
        self.last_position = self.slots[self.active_slot].position();
        self.last_progress = Instant::now();
    }

    async fn detach_all(&mut self) {
        for slot in &mut self.slots {
            slot.detach().await;
        }
    }
}

/// Whether the URL points at a container that must leave the app.
fn has_external_container(url: &str) -> bool {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.split(['?', '#']).next().unwrap_or("").to_string());
    match path.rsplit_once('.') {
        Some((_, extension)) => {
            EXTERNAL_CONTAINERS.contains(&extension.to_ascii_lowercase().as_str())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::player::media::{SimulatedMediaController, SimulatedMediaElement};
    use crate::player::PlaybackError;
    use crate::playlist::{Channel, ContentType};

    fn test_config() -> PlaybackConfig {
        PlaybackConfig {
            stall_timeout: Duration::from_millis(150),
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
            id: 1,
            name: "Test One".to_string(),
            logo_url: None,
            primary_url: sources[0].to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            group: "Other".to_string(),
            content_type: ContentType::Live,
            user_agent: None,
            referrer: None,
        }
    }

    struct RecordingExternal {
        launched: Mutex<Vec<String>>,
    }

    impl ExternalPlayerDelegate for RecordingExternal {
        fn open(&self, url: &str, _options: &LaunchOptions) -> Result<(), PlaybackError> {
            self.launched.lock().push(url.to_string());
            Ok(())
        }
    }

    struct Fixture {
        handle: OrchestratorHandle,
        events: mpsc::UnboundedReceiver<PlayerEvent>,
        slot0: SimulatedMediaController,
        slot1: SimulatedMediaController,
        external: Arc<RecordingExternal>,
    }

    fn spawn_fixture(config: PlaybackConfig) -> Fixture {
        let (element0, slot0) = SimulatedMediaElement::new();
        let (element1, slot1) = SimulatedMediaElement::new();
        let external = Arc::new(RecordingExternal {
            launched: Mutex::new(Vec::new()),
        });
        let deps = OrchestratorDeps {
            transcode: None,
            proxy: None,
            external: Arc::clone(&external) as Arc<dyn ExternalPlayerDelegate>,
            probe_client: reqwest::Client::new(),
        };
        let (handle, events) =
            spawn_orchestrator(config, deps, [Box::new(element0), Box::new(element1)]);
        Fixture {
            handle,
            events,
            slot0,
            slot1,
            external,
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<PlayerEvent>) -> PlayerEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for player event")
            .expect("event channel closed")
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn single_source_attaches_and_reports_playing() {
        let mut fixture = spawn_fixture(test_config());
        fixture
            .handle
            .play(test_channel(&["http://example.com/live.m3u8"]))
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut fixture.events).await,
            PlayerEvent::Loading {
                channel_id: 1,
                source_index: 0
            }
        );

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.is_playing()).await;
        assert_eq!(
            fixture.slot0.attached_url().as_deref(),
            Some("http://example.com/live.m3u8")
        );

        fixture.slot0.push_event(MediaEvent::Playing);
        assert_eq!(
            next_event(&mut fixture.events).await,
            PlayerEvent::Playing {
                channel_id: 1,
                strategy: PlayStrategy::DirectHls
            }
        );
    }

    #[tokio::test]
    async fn vod_container_extension_goes_to_external_player() {
        let mut fixture = spawn_fixture(test_config());
        fixture
            .handle
            .play(test_channel(&["http://example.com/movie.MKV"]))
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut fixture.events).await,
            PlayerEvent::ExternalLaunched {
                url: "http://example.com/movie.MKV".to_string()
            }
        );
        assert_eq!(
            fixture.external.launched.lock().as_slice(),
            ["http://example.com/movie.MKV"]
        );
        assert_eq!(fixture.slot0.attached_url(), None);
    }

    #[tokio::test]
    async fn mp4_stays_in_app() {
        let fixture = spawn_fixture(test_config());
        fixture
            .handle
            .play(test_channel(&["http://example.com/movie.mp4"]))
            .await
            .unwrap();

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.attached_url().is_some()).await;
        assert!(fixture.external.launched.lock().is_empty());
    }

    #[tokio::test]
    async fn force_external_overrides_container_detection() {
        let config = PlaybackConfig {
            force_external: true,
            ..test_config()
        };
        let fixture = spawn_fixture(config);
        fixture
            .handle
            .play(test_channel(&["http://example.com/live.m3u8"]))
            .await
            .unwrap();

        assert_eq!(
            fixture.external.launched.lock().as_slice(),
            ["http://example.com/live.m3u8"]
        );
    }

    #[tokio::test]
    async fn rejected_hls_attach_falls_back_to_mpegts() {
        let fixture = spawn_fixture(test_config());
        fixture.slot0.fail_next_attach(PlaybackError::FormatUnsupported {
            reason: "no demuxer".to_string(),
        });
        fixture
            .handle
            .play(test_channel(&["http://example.com/live.ts"]))
            .await
            .unwrap();

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.attached_format() == Some(StreamFormat::MpegTs)).await;

        let status = fixture.handle.status().await.unwrap();
        assert_eq!(status.strategy, Some(PlayStrategy::MpegTs));
    }

    #[tokio::test]
    async fn format_error_during_playback_switches_strategy_not_source() {
        let mut fixture = spawn_fixture(test_config());
        fixture
            .handle
            .play(test_channel(&["http://example.com/live.m3u8"]))
            .await
            .unwrap();
        let _ = next_event(&mut fixture.events).await; // Loading

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.is_playing()).await;
        fixture.slot0.push_event(MediaEvent::Error(MediaError::Format));

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.attached_format() == Some(StreamFormat::MpegTs)).await;

        // Same source retried, no SourceSwitched event. The next event is
        // the reload's Loading at the same index.
        assert_eq!(
            next_event(&mut fixture.events).await,
            PlayerEvent::Loading {
                channel_id: 1,
                source_index: 0
            }
        );
    }

    #[tokio::test]
    async fn media_error_without_standby_advances_to_next_mirror() {
        let mut fixture = spawn_fixture(test_config());
        fixture
            .handle
            .play(test_channel(&[
                "http://127.0.0.1:9/one.m3u8",
                "http://127.0.0.1:10/two.m3u8",
            ]))
            .await
            .unwrap();

        // Both race probes fail fast, so index 0 wins by fallback.
        assert_eq!(
            next_event(&mut fixture.events).await,
            PlayerEvent::Loading {
                channel_id: 1,
                source_index: 0
            }
        );
        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.is_playing()).await;

        // Standby armed on the other mirror but with nothing buffered yet.
        fixture.slot0.push_event(MediaEvent::Error(MediaError::Network));

        assert_eq!(
            next_event(&mut fixture.events).await,
            PlayerEvent::SourceSwitched {
                source_index: 1,
                failover: false
            }
        );
        assert_eq!(
            next_event(&mut fixture.events).await,
            PlayerEvent::Loading {
                channel_id: 1,
                source_index: 1
            }
        );

        let slot0 = fixture.slot0.clone();
        wait_until(move || {
            slot0
                .attached_url()
                .is_some_and(|url| url.contains("two.m3u8"))
        })
        .await;
    }

    #[tokio::test]
    async fn buffered_standby_takes_over_instantly() {
        let mut fixture = spawn_fixture(test_config());
        fixture
            .handle
            .play(test_channel(&[
                "http://127.0.0.1:9/one.m3u8",
                "http://127.0.0.1:10/two.m3u8",
            ]))
            .await
            .unwrap();
        let _ = next_event(&mut fixture.events).await; // Loading 0

        let slot1 = fixture.slot1.clone();
        wait_until(move || slot1.attached_url().is_some()).await;
        assert!(fixture.slot1.is_muted());
        assert_eq!(fixture.slot1.volume(), 0.0);

        fixture.slot1.set_buffered(5.0);
        fixture.slot0.push_event(MediaEvent::Error(MediaError::Decode));

        assert_eq!(
            next_event(&mut fixture.events).await,
            PlayerEvent::SourceSwitched {
                source_index: 1,
                failover: true
            }
        );

        // Standby adopted the user's volume; the dead slot is silenced.
        let slot1 = fixture.slot1.clone();
        wait_until(move || !slot1.is_muted()).await;
        assert_eq!(fixture.slot1.volume(), 1.0);
        assert!(fixture.slot0.is_muted());

        let status = fixture.handle.status().await.unwrap();
        assert_eq!(status.source_index, 1);
        assert!(status.playing);
    }

    #[tokio::test]
    async fn single_source_error_is_terminal() {
        let mut fixture = spawn_fixture(test_config());
        fixture
            .handle
            .play(test_channel(&["http://example.com/only.m3u8"]))
            .await
            .unwrap();
        let _ = next_event(&mut fixture.events).await; // Loading

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.is_playing()).await;
        fixture.slot0.push_event(MediaEvent::Error(MediaError::Network));

        assert_eq!(
            next_event(&mut fixture.events).await,
            PlayerEvent::TerminalError {
                message: "All sources failed".to_string()
            }
        );
        assert_eq!(fixture.slot0.attached_url(), None);
    }

    #[tokio::test]
    async fn terminal_error_triggers_auto_skip_when_enabled() {
        let config = PlaybackConfig {
            auto_skip_enabled: true,
            ..test_config()
        };
        let mut fixture = spawn_fixture(config);
        fixture
            .handle
            .play(test_channel(&["http://example.com/only.m3u8"]))
            .await
            .unwrap();
        let _ = next_event(&mut fixture.events).await; // Loading

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.is_playing()).await;
        fixture.slot0.push_event(MediaEvent::Error(MediaError::Network));

        assert!(matches!(
            next_event(&mut fixture.events).await,
            PlayerEvent::TerminalError { .. }
        ));
        assert_eq!(next_event(&mut fixture.events).await, PlayerEvent::SkipToNext);
    }

    #[tokio::test]
    async fn full_lap_over_mirrors_without_playing_is_terminal() {
        let mut fixture = spawn_fixture(test_config());
        fixture
            .handle
            .play(test_channel(&[
                "http://127.0.0.1:9/one.m3u8",
                "http://127.0.0.1:10/two.m3u8",
            ]))
            .await
            .unwrap();
        let _ = next_event(&mut fixture.events).await; // Loading 0

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.is_playing()).await;
        fixture.slot0.push_event(MediaEvent::Error(MediaError::Network));

        let _ = next_event(&mut fixture.events).await; // SourceSwitched 1
        let _ = next_event(&mut fixture.events).await; // Loading 1

        let slot0 = fixture.slot0.clone();
        wait_until(move || {
            slot0
                .attached_url()
                .is_some_and(|url| url.contains("two.m3u8"))
        })
        .await;
        fixture.slot0.push_event(MediaEvent::Error(MediaError::Network));

        assert!(matches!(
            next_event(&mut fixture.events).await,
            PlayerEvent::TerminalError { .. }
        ));
    }

    #[tokio::test]
    async fn stall_with_no_progress_feeds_retry_ladder() {
        let mut fixture = spawn_fixture(test_config());
        fixture
            .handle
            .play(test_channel(&["http://example.com/only.m3u8"]))
            .await
            .unwrap();
        let _ = next_event(&mut fixture.events).await; // Loading

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.is_playing()).await;
        fixture.slot0.push_event(MediaEvent::Playing);
        let _ = next_event(&mut fixture.events).await; // Playing

        // Never advance the position; the stall timeout expires.
        assert!(matches!(
            next_event(&mut fixture.events).await,
            PlayerEvent::TerminalError { .. }
        ));
    }

    #[tokio::test]
    async fn advancing_position_defuses_the_stall_timer() {
        let mut fixture = spawn_fixture(test_config());
        fixture
            .handle
            .play(test_channel(&["http://example.com/only.m3u8"]))
            .await
            .unwrap();
        let _ = next_event(&mut fixture.events).await; // Loading

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.is_playing()).await;
        fixture.slot0.push_event(MediaEvent::Playing);
        let _ = next_event(&mut fixture.events).await; // Playing

        for _ in 0..10 {
            fixture.slot0.advance_position(1.0);
            tokio::time::sleep(Duration::from_millis(40)).await;
        }

        let status = fixture.handle.status().await.unwrap();
        assert!(status.playing);
    }

    #[tokio::test]
    async fn ended_stream_reloads_after_delay() {
        let mut fixture = spawn_fixture(test_config());
        fixture
            .handle
            .play(test_channel(&["http://example.com/only.m3u8"]))
            .await
            .unwrap();
        let _ = next_event(&mut fixture.events).await; // Loading

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.is_playing()).await;
        fixture.slot0.push_event(MediaEvent::Playing);
        let _ = next_event(&mut fixture.events).await; // Playing

        let attaches_before = fixture.slot0.attach_count();
        fixture.slot0.push_event(MediaEvent::Ended);

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.attach_count() > attaches_before).await;
        assert_eq!(
            next_event(&mut fixture.events).await,
            PlayerEvent::Loading {
                channel_id: 1,
                source_index: 0
            }
        );
    }

    #[tokio::test]
    async fn volume_applies_to_active_slot_only() {
        let fixture = spawn_fixture(test_config());
        fixture
            .handle
            .play(test_channel(&[
                "http://127.0.0.1:9/one.m3u8",
                "http://127.0.0.1:10/two.m3u8",
            ]))
            .await
            .unwrap();

        let slot1 = fixture.slot1.clone();
        wait_until(move || slot1.attached_url().is_some()).await;

        fixture.handle.set_volume(0.5).await.unwrap();
        fixture.handle.set_muted(false).await.unwrap();

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.volume() == 0.5).await;
        assert_eq!(fixture.slot1.volume(), 0.0);
        assert!(fixture.slot1.is_muted());
    }

    #[tokio::test]
    async fn stop_detaches_everything() {
        let fixture = spawn_fixture(test_config());
        fixture
            .handle
            .play(test_channel(&["http://example.com/only.m3u8"]))
            .await
            .unwrap();

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.attached_url().is_some()).await;

        fixture.handle.stop().await.unwrap();
        assert_eq!(fixture.slot0.attached_url(), None);

        let status = fixture.handle.status().await.unwrap();
        assert_eq!(status.channel_id, None);
        assert!(!status.playing);
    }

    #[tokio::test]
    async fn play_supersedes_previous_channel() {
        let mut fixture = spawn_fixture(test_config());
        fixture
            .handle
            .play(test_channel(&["http://example.com/first.m3u8"]))
            .await
            .unwrap();
        let _ = next_event(&mut fixture.events).await; // Loading 1

        let slot0 = fixture.slot0.clone();
        wait_until(move || slot0.attached_url().is_some()).await;

        let mut second = test_channel(&["http://example.com/second.m3u8"]);
        second.id = 2;
        fixture.handle.play(second).await.unwrap();

        let slot0 = fixture.slot0.clone();
        wait_until(move || {
            slot0
                .attached_url()
                .is_some_and(|url| url.contains("second.m3u8"))
        })
        .await;

        let status = fixture.handle.status().await.unwrap();
        assert_eq!(status.channel_id, Some(2));
    }

    #[test]
    fn external_container_detection_ignores_query_strings() {
        assert!(has_external_container("http://x.test/v/movie.mkv?token=1"));
        assert!(has_external_container("http://x.test/movie.AVI"));
        assert!(!has_external_container("http://x.test/live.m3u8"));
        assert!(!has_external_container("http://x.test/movie.mp4"));
        assert!(!has_external_container("http://x.test/stream"));
    }
}

//! Transcode session lifecycle: spawn, readiness poll, supersede, stop.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::registry::{ActiveSession, SessionRegistry};
use super::segment_server::SegmentServer;
use super::{TranscodeError, TranscoderStatus};
use crate::config::{BROWSER_USER_AGENT, TranscodeConfig};

/// Everything a transcoder implementation needs to start one session.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub stream_url: String,
    pub user_agent: String,
    pub segment_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub segment_seconds: u32,
    pub playlist_window: u32,
    pub audio_bitrate: String,
}

/// Abstraction over the transcoding backend so session management can be
/// exercised without a real FFmpeg install.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Whether a usable transcoder binary is present.
    fn is_available(&self) -> bool;

    /// Path of the binary, when known.
    fn binary_path(&self) -> Option<PathBuf>;

    /// Spawns the child process for one session, stderr piped.
    async fn spawn(&self, request: &SpawnRequest) -> std::io::Result<Child>;
}

/// Production transcoder driving the system FFmpeg binary.
pub struct SystemTranscoder {
    ffmpeg_path: Option<PathBuf>,
}

impl SystemTranscoder {
    pub fn new(ffmpeg_path: Option<PathBuf>) -> Self {
        Self { ffmpeg_path }
    }

    /// Builds the FFmpeg invocation tuned for live-stream resilience:
    /// tolerate discontinuous timestamps and corrupt packets, regenerate
    /// timestamps, bounded probing, auto-reconnect across network/HTTP/EOF
    /// failures, copy video, re-encode audio to stereo AAC, and emit a
    /// short-segment HLS window with old segments auto-deleted.
    fn build_hls_args(request: &SpawnRequest) -> Vec<String> {
        let segment_pattern = request
            .segment_dir
            .join("segment%03d.ts")
            .to_string_lossy()
            .into_owned();
        let manifest = request.manifest_path.to_string_lossy().into_owned();
        let segment_seconds = request.segment_seconds.to_string();
        let playlist_window = request.playlist_window.to_string();
        [
            "-y",
            "-loglevel",
            "error",
            "-fflags",
            "+igndts+discardcorrupt+genpts+nobuffer+flush_packets",
            "-flags",
            "low_delay",
            "-analyzeduration",
            "5000000",
            "-probesize",
            "5000000",
            "-err_detect",
            "ignore_err",
            "-user_agent",
            request.user_agent.as_str(),
            "-reconnect",
            "1",
            "-reconnect_streamed",
            "1",
            "-reconnect_on_network_error",
            "1",
            "-reconnect_on_http_error",
            "4xx,5xx",
            "-reconnect_delay_max",
            "10",
            "-reconnect_at_eof",
            "1",
            "-rw_timeout",
            "15000000",
            "-i",
            request.stream_url.as_str(),
            "-max_muxing_queue_size",
            "4096",
            "-c:v",
            "copy",
            "-c:a",
            "aac",
            "-b:a",
            request.audio_bitrate.as_str(),
            "-ac",
            "2",
            "-tag:v",
            "hvc1",
            "-avoid_negative_ts",
            "make_zero",
            "-f",
            "hls",
            "-hls_time",
            segment_seconds.as_str(),
            "-hls_list_size",
            playlist_window.as_str(),
            "-hls_flags",
            "delete_segments+omit_endlist+split_by_time",
            "-hls_segment_filename",
            segment_pattern.as_str(),
            manifest.as_str(),
        ]
        .into_iter()
        .map(str::to_string)
        .collect()
    }
}

#[async_trait]
impl Transcoder for SystemTranscoder {
    fn is_available(&self) -> bool {
        self.ffmpeg_path.is_some()
    }

    fn binary_path(&self) -> Option<PathBuf> {
        self.ffmpeg_path.clone()
    }

    async fn spawn(&self, request: &SpawnRequest) -> std::io::Result<Child> {
        let path = self.ffmpeg_path.as_ref().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "ffmpeg path not set")
        })?;

        Command::new(path)
            .args(Self::build_hls_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Simulated transcoder for tests: spawns an inert process and optionally
/// fabricates the manifest after a delay.
#[cfg(any(test, feature = "test-utils"))]
pub struct SimulatedTranscoder {
    /// When set, the manifest appears this long after spawn; `None` means it
    /// never appears (exercises the timeout path).
    manifest_delay: Option<std::time::Duration>,
    fail_spawn: bool,
}

#[cfg(any(test, feature = "test-utils"))]
impl SimulatedTranscoder {
    pub fn ready_after(delay: std::time::Duration) -> Self {
        Self {
            manifest_delay: Some(delay),
            fail_spawn: false,
        }
    }

    pub fn never_ready() -> Self {
        Self {
            manifest_delay: None,
            fail_spawn: false,
        }
    }

    pub fn failing_spawn() -> Self {
        Self {
            manifest_delay: None,
            fail_spawn: true,
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Transcoder for SimulatedTranscoder {
    fn is_available(&self) -> bool {
        true
    }

    fn binary_path(&self) -> Option<PathBuf> {
        Some(PathBuf::from("simulated-ffmpeg"))
    }

    async fn spawn(&self, request: &SpawnRequest) -> std::io::Result<Child> {
        if self.fail_spawn {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "simulated spawn failure",
            ));
        }

        if let Some(delay) = self.manifest_delay {
            let manifest = request.manifest_path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tokio::fs::write(&manifest, "#EXTM3U\n#EXT-X-VERSION:3\n").await;
            });
        }

        Command::new("sleep")
            .arg("600")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Name of the per-session manifest file.
const MANIFEST_FILE: &str = "stream.m3u8";

/// Result of a successful start: where the HLS output can be demuxed from.
#[derive(Debug, Clone)]
pub struct ReadySession {
    pub hls_url: String,
    pub session_id: u64,
}

/// Owns FFmpeg session lifecycle for all slots.
///
/// Starting a session for a slot fully stops any predecessor (kill, map
/// removal, settle grace) before the new session's manifest poll begins.
/// Sessions in distinct slots run concurrently and independently.
pub struct TranscodeManager {
    config: TranscodeConfig,
    registry: Arc<SessionRegistry>,
    transcoder: Arc<dyn Transcoder>,
    hls_port: u16,
}

impl TranscodeManager {
    /// Creates a manager serving HLS URLs on an already-bound port.
    pub fn new(config: TranscodeConfig, transcoder: Arc<dyn Transcoder>, hls_port: u16) -> Self {
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            transcoder,
            hls_port,
        }
    }

    /// Creates the HLS root, starts the segment file server and returns the
    /// manager wired to it.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Io` - HLS root creation or server bind failed
    pub async fn start_with_server(
        config: TranscodeConfig,
        transcoder: Arc<dyn Transcoder>,
    ) -> Result<(Self, SegmentServer), TranscodeError> {
        tokio::fs::create_dir_all(&config.hls_root).await?;
        let server = SegmentServer::start(config.hls_root.clone(), config.preferred_hls_port).await?;
        let manager = Self::new(config, transcoder, server.port());
        Ok((manager, server))
    }

    /// Registry handle, shared with anything that needs live session state.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Availability and path of the underlying transcoder binary.
    pub fn status(&self) -> TranscoderStatus {
        TranscoderStatus {
            available: self.transcoder.is_available(),
            path: self.transcoder.binary_path(),
        }
    }

    /// Starts a transcode session for `stream_id`, superseding any session
    /// that currently owns the slot.
    ///
    /// Resolves once the HLS manifest is ready, or with the failure that
    /// prevented it. A start superseded by a later one for the same slot
    /// resolves with [`TranscodeError::Superseded`], which callers swallow.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::TranscoderUnavailable` - No FFmpeg binary
    /// - `TranscodeError::ProcessFailed` - Spawn failure or exit before ready
    /// - `TranscodeError::StartupTimeout` - Manifest never appeared in time
    /// - `TranscodeError::Superseded` - A newer session claimed the slot
    pub async fn start_transcode(
        &self,
        stream_url: &str,
        stream_id: &str,
        user_agent: Option<&str>,
    ) -> Result<ReadySession, TranscodeError> {
        if !self.transcoder.is_available() {
            return Err(TranscodeError::TranscoderUnavailable);
        }

        let session_id = self.registry.next_session_id();
        info!(
            stream_id,
            session_id, "Starting transcode session for {stream_url}"
        );

        // Fully stop the predecessor before our own poll begins, then let OS
        // file handles settle.
        if let Some(previous) = self.registry.take(stream_id) {
            debug!(
                stream_id,
                superseded = previous.session_id,
                "Killing superseded session"
            );
            kill_session(previous);
            tokio::time::sleep(self.config.kill_grace).await;
        }

        self.sweep_stale_dirs().await;

        // Reserve the id before the directory exists: a sweep racing this
        // start (another slot stopping, say) must not delete it while the
        // spawn is still in flight.
        self.registry.begin_start(session_id);

        let segment_dir = self.config.hls_root.join(session_id.to_string());
        if let Err(e) = tokio::fs::create_dir_all(&segment_dir).await {
            self.registry.finish_start(session_id);
            return Err(e.into());
        }
        let manifest_path = segment_dir.join(MANIFEST_FILE);

        let request = SpawnRequest {
            stream_url: stream_url.to_string(),
            user_agent: user_agent.unwrap_or(BROWSER_USER_AGENT).to_string(),
            segment_dir: segment_dir.clone(),
            manifest_path: manifest_path.clone(),
            segment_seconds: self.config.segment_seconds,
            playlist_window: self.config.playlist_window,
            audio_bitrate: self.config.audio_bitrate.to_string(),
        };

        let mut child = match self.transcoder.spawn(&request).await {
            Ok(child) => child,
            Err(e) => {
                warn!(stream_id, session_id, "Transcoder spawn failed: {e}");
                self.registry.finish_start(session_id);
                return Err(TranscodeError::ProcessFailed {
                    stderr_tail: e.to_string(),
                });
            }
        };

        let stderr_tail = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_capture(stderr, Arc::clone(&stderr_tail), self.config.stderr_tail_bytes);
        }

        // Claim the slot immediately so later starts supersede us cleanly.
        self.registry.install(ActiveSession {
            session_id,
            stream_id: stream_id.to_string(),
            child,
            segment_dir,
            stderr_tail: Arc::clone(&stderr_tail),
            started_at: Utc::now(),
        });
        self.registry.finish_start(session_id);

        self.await_manifest(stream_id, session_id, &manifest_path, &stderr_tail)
            .await
    }

    /// Polls for manifest readiness, observing session identity every tick.
    async fn await_manifest(
        &self,
        stream_id: &str,
        session_id: u64,
        manifest_path: &Path,
        stderr_tail: &Arc<Mutex<String>>,
    ) -> Result<ReadySession, TranscodeError> {
        let deadline = Instant::now() + self.config.manifest_timeout;

        loop {
            tokio::time::sleep(self.config.manifest_poll_interval).await;

            // Superseded? Resolve as a benign cancellation, never touch the
            // replacement session.
            if !self.registry.is_current(stream_id, session_id) {
                debug!(stream_id, session_id, "Session superseded during startup");
                return Err(TranscodeError::Superseded);
            }

            // Process died before producing a manifest.
            if let Some(Some(status)) = self.registry.try_wait(stream_id, session_id) {
                let tail = stderr_tail.lock().clone();
                warn!(stream_id, session_id, "Transcoder exited early: {status}");
                if let Some(session) = self.registry.take_if_current(stream_id, session_id) {
                    reap_session(session);
                }
                return Err(TranscodeError::ProcessFailed { stderr_tail: tail });
            }

            if manifest_ready(manifest_path).await {
                info!(stream_id, session_id, "Transcode session ready");
                return Ok(ReadySession {
                    hls_url: format!(
                        "http://127.0.0.1:{}/{}/{}",
                        self.hls_port, session_id, MANIFEST_FILE
                    ),
                    session_id,
                });
            }

            if Instant::now() >= deadline {
                let tail = stderr_tail.lock().clone();
                warn!(stream_id, session_id, "Timed out waiting for manifest");
                if let Some(session) = self.registry.take_if_current(stream_id, session_id) {
                    kill_session(session);
                }
                return Err(TranscodeError::StartupTimeout { stderr_tail: tail });
            }
        }
    }

    /// Stops one slot, or every slot when `stream_id` is `None`.
    ///
    /// Idempotent: stopping with nothing active succeeds as a no-op. Always
    /// sweeps stale session directories afterwards.
    pub async fn stop_transcode(&self, stream_id: Option<&str>) {
        match stream_id {
            Some(stream_id) => {
                if let Some(session) = self.registry.take(stream_id) {
                    info!(stream_id, session.session_id, "Stopping transcode session");
                    kill_session(session);
                }
            }
            None => {
                for session in self.registry.take_all() {
                    info!(
                        stream_id = %session.stream_id,
                        session.session_id,
                        "Stopping transcode session"
                    );
                    kill_session(session);
                }
            }
        }

        self.sweep_stale_dirs().await;
    }

    /// Deletes every session directory not owned by a currently-active
    /// session.
    ///
    /// The keep-set is re-read from the live registry immediately before each
    /// deletion, so a session that starts while the sweep is running always
    /// survives it.
    pub async fn sweep_stale_dirs(&self) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.config.hls_root).await else {
            return;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let keep = name
                .to_str()
                .and_then(|n| n.parse::<u64>().ok())
                .is_some_and(|id| self.registry.active_ids().contains(&id));
            if keep {
                continue;
            }

            let path = entry.path();
            let result = match entry.file_type().await {
                Ok(t) if t.is_dir() => tokio::fs::remove_dir_all(&path).await,
                _ => tokio::fs::remove_file(&path).await,
            };
            match result {
                Ok(()) => debug!("Swept stale session output: {}", path.display()),
                Err(e) => debug!("Failed to sweep {}: {e}", path.display()),
            }
        }
    }
}

/// True once the manifest exists with non-zero size.
async fn manifest_ready(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

/// Kills a session's process and reaps it in the background.
fn kill_session(mut session: ActiveSession) {
    if let Err(e) = session.child.start_kill() {
        debug!(session.session_id, "Kill failed (already exited?): {e}");
    }
    reap_session(session);
}

/// Awaits process exit off the caller's path so no zombie lingers.
fn reap_session(mut session: ActiveSession) {
    tokio::spawn(async move {
        let _ = session.child.wait().await;
    });
}

/// Captures stderr into a bounded tail used for failure diagnostics.
fn spawn_stderr_capture(
    mut stderr: tokio::process::ChildStderr,
    tail: Arc<Mutex<String>>,
    max_bytes: usize,
) {
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]);
                    let mut tail = tail.lock();
                    tail.push_str(&chunk);
                    if tail.len() > max_bytes {
                        let cut = tail.len() - max_bytes;
                        let boundary = tail
                            .char_indices()
                            .map(|(i, _)| i)
                            .find(|&i| i >= cut)
                            .unwrap_or(0);
                        *tail = tail[boundary..].to_string();
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    fn test_config(root: &TempDir) -> TranscodeConfig {
        TranscodeConfig {
            hls_root: root.path().to_path_buf(),
            kill_grace: Duration::from_millis(10),
            manifest_poll_interval: Duration::from_millis(20),
            manifest_timeout: Duration::from_millis(500),
            ..TranscodeConfig::default()
        }
    }

    fn manager(root: &TempDir, transcoder: Arc<dyn Transcoder>) -> TranscodeManager {
        TranscodeManager::new(test_config(root), transcoder, 9877)
    }

    #[tokio::test]
    async fn successful_start_returns_session_scoped_url() {
        let root = TempDir::new().unwrap();
        let manager = manager(
            &root,
            Arc::new(SimulatedTranscoder::ready_after(Duration::from_millis(30))),
        );

        let ready = manager
            .start_transcode("http://host/live.ts", "primary", None)
            .await
            .unwrap();

        assert!(
            ready
                .hls_url
                .ends_with(&format!("/{}/stream.m3u8", ready.session_id))
        );
        assert_eq!(manager.registry().current_id("primary"), Some(ready.session_id));
        manager.stop_transcode(None).await;
    }

    #[tokio::test]
    async fn manifest_timeout_kills_process_and_clears_slot() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, Arc::new(SimulatedTranscoder::never_ready()));

        let result = manager
            .start_transcode("http://host/live.ts", "primary", None)
            .await;

        match result {
            Err(TranscodeError::StartupTimeout { .. }) => {}
            other => panic!("expected StartupTimeout, got {other:?}"),
        }
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_is_process_error() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, Arc::new(SimulatedTranscoder::failing_spawn()));

        let result = manager
            .start_transcode("http://host/live.ts", "primary", None)
            .await;
        assert!(matches!(result, Err(TranscodeError::ProcessFailed { .. })));
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn unavailable_transcoder_is_terminal_configuration_state() {
        struct Unavailable;
        #[async_trait]
        impl Transcoder for Unavailable {
            fn is_available(&self) -> bool {
                false
            }
            fn binary_path(&self) -> Option<PathBuf> {
                None
            }
            async fn spawn(&self, _: &SpawnRequest) -> std::io::Result<Child> {
                unreachable!("spawn must not be called when unavailable")
            }
        }

        let root = TempDir::new().unwrap();
        let manager = manager(&root, Arc::new(Unavailable));
        let result = manager
            .start_transcode("http://host/live.ts", "primary", None)
            .await;
        assert!(matches!(result, Err(TranscodeError::TranscoderUnavailable)));
        assert!(!manager.status().available);
    }

    #[tokio::test]
    async fn second_start_supersedes_pending_first() {
        let root = TempDir::new().unwrap();
        let manager = Arc::new(manager(
            &root,
            Arc::new(SimulatedTranscoder::ready_after(Duration::from_millis(150))),
        ));

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(
                async move { manager.start_transcode("http://host/a.ts", "primary", None).await },
            )
        };
        // Let the first start claim the slot before superseding it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = manager
            .start_transcode("http://host/b.ts", "primary", None)
            .await
            .unwrap();

        let first = first.await.unwrap();
        assert!(matches!(first, Err(TranscodeError::Superseded)));
        assert_eq!(
            manager.registry().current_id("primary"),
            Some(second.session_id)
        );
        assert!(second.hls_url.contains(&second.session_id.to_string()));
        manager.stop_transcode(None).await;
    }

    #[tokio::test]
    async fn rapid_consecutive_starts_leave_one_live_session() {
        let root = TempDir::new().unwrap();
        let manager = Arc::new(manager(
            &root,
            Arc::new(SimulatedTranscoder::ready_after(Duration::from_millis(20))),
        ));

        let mut last = None;
        for i in 0..4 {
            let url = format!("http://host/{i}.ts");
            match manager.start_transcode(&url, "primary", None).await {
                Ok(ready) => last = Some(ready.session_id),
                Err(TranscodeError::Superseded) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(manager.registry().len(), 1);
        assert_eq!(manager.registry().current_id("primary"), last);
        manager.stop_transcode(None).await;
    }

    #[tokio::test]
    async fn distinct_slots_transcode_concurrently() {
        let root = TempDir::new().unwrap();
        let manager = manager(
            &root,
            Arc::new(SimulatedTranscoder::ready_after(Duration::from_millis(20))),
        );

        let primary = manager
            .start_transcode("http://host/a.ts", "primary", None)
            .await
            .unwrap();
        let backup = manager
            .start_transcode("http://host/b.ts", "backup", None)
            .await
            .unwrap();

        assert_ne!(primary.session_id, backup.session_id);
        assert_eq!(manager.registry().len(), 2);
        manager.stop_transcode(None).await;
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn stop_with_nothing_active_is_a_noop() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root, Arc::new(SimulatedTranscoder::never_ready()));
        // Must not panic or error; both targeted and stop-all forms.
        manager.stop_transcode(Some("primary")).await;
        manager.stop_transcode(None).await;
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn sweep_preserves_active_sessions_and_removes_stale_dirs() {
        let root = TempDir::new().unwrap();
        let manager = manager(
            &root,
            Arc::new(SimulatedTranscoder::ready_after(Duration::from_millis(20))),
        );

        let a = manager
            .start_transcode("http://host/a.ts", "primary", None)
            .await
            .unwrap();
        let b = manager
            .start_transcode("http://host/b.ts", "backup", None)
            .await
            .unwrap();

        // An orphaned directory from a process that died without cleanup.
        let stale = root.path().join("99999");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("segment000.ts"), b"x").unwrap();

        manager.sweep_stale_dirs().await;

        assert!(root.path().join(a.session_id.to_string()).exists());
        assert!(root.path().join(b.session_id.to_string()).exists());
        assert!(!stale.exists());
        manager.stop_transcode(None).await;
    }

    #[tokio::test]
    async fn sweep_during_pending_spawn_keeps_the_new_directory() {
        // Spawn takes a while; the manifest appears shortly after it returns.
        struct DelayedSpawn;
        #[async_trait]
        impl Transcoder for DelayedSpawn {
            fn is_available(&self) -> bool {
                true
            }
            fn binary_path(&self) -> Option<PathBuf> {
                Some(PathBuf::from("simulated-ffmpeg"))
            }
            async fn spawn(&self, request: &SpawnRequest) -> std::io::Result<Child> {
                tokio::time::sleep(Duration::from_millis(150)).await;
                let manifest = request.manifest_path.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    let _ = tokio::fs::write(&manifest, "#EXTM3U\n#EXT-X-VERSION:3\n").await;
                });
                Command::new("sleep")
                    .arg("600")
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .spawn()
            }
        }

        let root = TempDir::new().unwrap();
        let manager = Arc::new(manager(&root, Arc::new(DelayedSpawn)));

        let start = {
            let manager = Arc::clone(&manager);
            tokio::spawn(
                async move { manager.start_transcode("http://host/live.ts", "primary", None).await },
            )
        };

        // Sweep while the spawn is still in flight; the session directory
        // exists but the session is not installed yet.
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.sweep_stale_dirs().await;

        let ready = start.await.unwrap().unwrap();
        assert!(root.path().join(ready.session_id.to_string()).exists());
        manager.stop_transcode(None).await;
    }

    #[tokio::test]
    async fn stop_all_sweeps_session_directories() {
        let root = TempDir::new().unwrap();
        let manager = manager(
            &root,
            Arc::new(SimulatedTranscoder::ready_after(Duration::from_millis(20))),
        );

        let ready = manager
            .start_transcode("http://host/a.ts", "primary", None)
            .await
            .unwrap();
        let dir = root.path().join(ready.session_id.to_string());
        assert!(dir.exists());

        manager.stop_transcode(None).await;
        assert!(!dir.exists());
    }

    #[test]
    fn hls_args_carry_resilience_and_window_settings() {
        let request = SpawnRequest {
            stream_url: "http://host/live.ts".into(),
            user_agent: "UA/1.0".into(),
            segment_dir: PathBuf::from("/tmp/hls/7"),
            manifest_path: PathBuf::from("/tmp/hls/7/stream.m3u8"),
            segment_seconds: 3,
            playlist_window: 10,
            audio_bitrate: "128k".into(),
        };
        let args = SystemTranscoder::build_hls_args(&request);

        let expect_pair = |flag: &str, value: &str| {
            let at = args.iter().position(|a| a == flag).unwrap_or_else(|| {
                panic!("missing flag {flag}");
            });
            assert_eq!(args[at + 1], value, "unexpected value for {flag}");
        };

        expect_pair("-c:v", "copy");
        expect_pair("-c:a", "aac");
        expect_pair("-ac", "2");
        expect_pair("-hls_time", "3");
        expect_pair("-hls_list_size", "10");
        expect_pair("-reconnect_on_http_error", "4xx,5xx");
        expect_pair("-user_agent", "UA/1.0");
        assert!(args.iter().any(|a| a.contains("delete_segments")));
        assert_eq!(args.last().unwrap(), "/tmp/hls/7/stream.m3u8");
    }
}

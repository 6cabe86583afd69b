//! External player delegation.
//!
//! Streams in containers the in-app pipeline cannot handle are handed to
//! VLC or mpv. Launches are fire-and-forget; the spawned player outlives us.

use std::path::PathBuf;
use std::process::Stdio;

use tracing::{info, warn};

use super::PlaybackError;

/// Per-launch header options forwarded to the external player.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

/// Seam for handing a stream URL to an out-of-process player.
pub trait ExternalPlayerDelegate: Send + Sync {
    /// Launches the player detached on the given URL.
    ///
    /// # Errors
    ///
    /// - `PlaybackError::ExternalLaunchFailed` - No player installed or the
    ///   spawn itself failed
    fn open(&self, url: &str, options: &LaunchOptions) -> Result<(), PlaybackError>;
}

/// Locates VLC or mpv on this machine and spawns it detached.
pub struct SystemExternalPlayer;

#[derive(Debug, Clone, Copy)]
enum PlayerKind {
    Vlc,
    Mpv,
}

impl SystemExternalPlayer {
    fn locate() -> Option<(PathBuf, PlayerKind)> {
        for candidate in vlc_paths() {
            if candidate.is_file() {
                return Some((candidate, PlayerKind::Vlc));
            }
        }
        for candidate in mpv_paths() {
            if candidate.is_file() {
                return Some((candidate, PlayerKind::Mpv));
            }
        }
        if probe_in_path("vlc") {
            return Some((PathBuf::from("vlc"), PlayerKind::Vlc));
        }
        if probe_in_path("mpv") {
            return Some((PathBuf::from("mpv"), PlayerKind::Mpv));
        }
        None
    }
}

impl ExternalPlayerDelegate for SystemExternalPlayer {
    fn open(&self, url: &str, options: &LaunchOptions) -> Result<(), PlaybackError> {
        let (binary, kind) = Self::locate().ok_or_else(|| PlaybackError::ExternalLaunchFailed {
            reason: "neither VLC nor mpv is installed".to_string(),
        })?;

        let mut command = std::process::Command::new(&binary);
        command.arg(url);
        match kind {
            PlayerKind::Vlc => {
                if let Some(agent) = &options.user_agent {
                    command.arg(format!(":http-user-agent={agent}"));
                }
                if let Some(referrer) = &options.referrer {
                    command.arg(format!(":http-referrer={referrer}"));
                }
            }
            PlayerKind::Mpv => {
                if let Some(agent) = &options.user_agent {
                    command.arg(format!("--user-agent={agent}"));
                }
                if let Some(referrer) = &options.referrer {
                    command.arg(format!("--referrer={referrer}"));
                }
            }
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PlaybackError::ExternalLaunchFailed {
                reason: format!("could not spawn {}: {e}", binary.display()),
            })?;

        info!("Launched external player {} for {url}", binary.display());
        Ok(())
    }
}

/// Delegate that drops every launch request. Used headless and in tests.
pub struct NoopExternalPlayer;

impl ExternalPlayerDelegate for NoopExternalPlayer {
    fn open(&self, url: &str, _options: &LaunchOptions) -> Result<(), PlaybackError> {
        warn!("External playback requested for {url} but no delegate is configured");
        Ok(())
    }
}

#[cfg(windows)]
fn vlc_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from(r"C:\Program Files\VideoLAN\VLC\vlc.exe"),
        PathBuf::from(r"C:\Program Files (x86)\VideoLAN\VLC\vlc.exe"),
    ]
}

#[cfg(not(windows))]
fn vlc_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/bin/vlc"),
        PathBuf::from("/usr/local/bin/vlc"),
        PathBuf::from("/Applications/VLC.app/Contents/MacOS/VLC"),
    ]
}

#[cfg(windows)]
fn mpv_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from(r"C:\Program Files\mpv\mpv.exe"),
        PathBuf::from(r"C:\Program Files (x86)\mpv\mpv.exe"),
    ]
}

#[cfg(not(windows))]
fn mpv_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/bin/mpv"),
        PathBuf::from("/usr/local/bin/mpv"),
        PathBuf::from("/opt/homebrew/bin/mpv"),
    ]
}

fn probe_in_path(binary: &str) -> bool {
    std::process::Command::new(binary)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_delegate_accepts_any_launch() {
        let delegate = NoopExternalPlayer;
        let options = LaunchOptions {
            user_agent: Some("Agent/1.0".to_string()),
            referrer: None,
        };
        assert!(delegate.open("http://example.com/movie.mkv", &options).is_ok());
    }
}

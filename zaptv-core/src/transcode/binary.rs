//! FFmpeg binary detection and automatic installation.
//!
//! Looks for an existing binary first (install directory, well-known system
//! locations, then `PATH`). When none is found, a static build can be
//! downloaded from the BtbN release archive and unpacked into the install
//! directory, with progress reported through a callback.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::TranscodeError;

#[cfg(windows)]
const DOWNLOAD_URL: &str =
    "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-win64-gpl.zip";
#[cfg(all(unix, target_os = "macos"))]
const DOWNLOAD_URL: &str = "https://evermeet.cx/ffmpeg/getrelease/ffmpeg/zip";
#[cfg(all(unix, not(target_os = "macos")))]
const DOWNLOAD_URL: &str =
    "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-linux64-gpl.zip";

#[cfg(windows)]
const BINARY_NAME: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const BINARY_NAME: &str = "ffmpeg";

/// Availability snapshot of the transcoder binary.
#[derive(Debug, Clone, Serialize)]
pub struct TranscoderStatus {
    pub available: bool,
    pub path: Option<PathBuf>,
}

/// Phase of an in-flight binary installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Downloading,
    Extracting,
    Complete,
}

/// Progress event emitted while installing the binary.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DownloadProgress {
    pub status: DownloadStatus,
    /// Percentage in `0..=100`. Stays at 0 when the archive size is unknown.
    pub progress: u8,
}

/// Locates or installs the FFmpeg binary.
pub struct FfmpegInstaller {
    install_dir: PathBuf,
    client: reqwest::Client,
}

impl FfmpegInstaller {
    pub fn new(install_dir: PathBuf) -> Self {
        Self {
            install_dir,
            client: reqwest::Client::new(),
        }
    }

    /// Searches for an existing binary without touching the network.
    ///
    /// Order: install directory, well-known system locations, `PATH`.
    pub fn locate(&self) -> Option<PathBuf> {
        let installed = self.install_dir.join(BINARY_NAME);
        let mut candidates = vec![installed];
        candidates.extend(well_known_paths());

        for candidate in candidates {
            if candidate.is_file() {
                info!("FFmpeg found at {}", candidate.display());
                return Some(candidate);
            }
        }

        if probe_path_binary() {
            info!("FFmpeg found in PATH");
            return Some(PathBuf::from(BINARY_NAME));
        }

        None
    }

    /// Downloads and unpacks a static FFmpeg build into the install
    /// directory, reporting progress through `on_progress`.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::InstallFailed` - Download, extraction or
    ///   verification failed
    /// - `TranscodeError::Io` - Install directory or archive could not be
    ///   written
    pub async fn install<F>(&self, mut on_progress: F) -> Result<PathBuf, TranscodeError>
    where
        F: FnMut(DownloadProgress) + Send,
    {
        tokio::fs::create_dir_all(&self.install_dir).await?;
        let archive_path = self.install_dir.join("ffmpeg.zip");

        info!("Downloading FFmpeg from {DOWNLOAD_URL}");
        on_progress(DownloadProgress {
            status: DownloadStatus::Downloading,
            progress: 0,
        });

        let response = self
            .client
            .get(DOWNLOAD_URL)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| TranscodeError::InstallFailed {
                reason: format!("download failed: {e}"),
            })?;

        let total_size = response.content_length().unwrap_or(0);
        let mut downloaded: u64 = 0;
        let mut last_reported: u8 = 0;

        let mut file = tokio::fs::File::create(&archive_path).await?;
        let mut stream = response.bytes_stream();
        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&archive_path).await;
                    return Err(TranscodeError::InstallFailed {
                        reason: format!("download interrupted: {e}"),
                    });
                }
            };
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if total_size > 0 {
                let percent = ((downloaded * 100) / total_size).min(100) as u8;
                if percent != last_reported {
                    last_reported = percent;
                    on_progress(DownloadProgress {
                        status: DownloadStatus::Downloading,
                        progress: percent,
                    });
                }
            }
        }
        file.flush().await?;
        drop(file);

        on_progress(DownloadProgress {
            status: DownloadStatus::Extracting,
            progress: 100,
        });

        info!("Extracting FFmpeg");
        let install_dir = self.install_dir.clone();
        let archive = archive_path.clone();
        let binary_path = tokio::task::spawn_blocking(move || {
            extract_binary(&archive, &install_dir)
        })
        .await
        .map_err(|e| TranscodeError::InstallFailed {
            reason: format!("extraction task failed: {e}"),
        })??;

        if let Err(e) = tokio::fs::remove_file(&archive_path).await {
            warn!("Could not remove FFmpeg archive: {e}");
        }

        if !binary_path.is_file() {
            return Err(TranscodeError::InstallFailed {
                reason: "extracted binary missing".to_string(),
            });
        }

        info!("FFmpeg installed at {}", binary_path.display());
        on_progress(DownloadProgress {
            status: DownloadStatus::Complete,
            progress: 100,
        });
        Ok(binary_path)
    }
}

/// Pulls the `ffmpeg` executable out of the downloaded archive, ignoring
/// everything else in it.
fn extract_binary(archive_path: &Path, install_dir: &Path) -> Result<PathBuf, TranscodeError> {
    let file = std::fs::File::open(archive_path)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| TranscodeError::InstallFailed {
        reason: format!("invalid archive: {e}"),
    })?;

    let target = install_dir.join(BINARY_NAME);
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| TranscodeError::InstallFailed {
            reason: format!("corrupt archive entry: {e}"),
        })?;
        if !entry.name().ends_with(BINARY_NAME) || entry.is_dir() {
            continue;
        }

        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        drop(out);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755))?;
        }

        return Ok(target);
    }

    Err(TranscodeError::InstallFailed {
        reason: "no ffmpeg executable in archive".to_string(),
    })
}

#[cfg(windows)]
fn well_known_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from(r"C:\ffmpeg\bin\ffmpeg.exe"),
        PathBuf::from(r"C:\Program Files\ffmpeg\bin\ffmpeg.exe"),
    ]
}

#[cfg(not(windows))]
fn well_known_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/bin/ffmpeg"),
        PathBuf::from("/usr/local/bin/ffmpeg"),
        PathBuf::from("/opt/homebrew/bin/ffmpeg"),
    ]
}

/// Whether a bare `ffmpeg` resolves through `PATH`.
fn probe_path_binary() -> bool {
    std::process::Command::new(BINARY_NAME)
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

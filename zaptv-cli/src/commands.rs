//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use tokio::fs;
use zaptv_core::config::ZaptvConfig;
use zaptv_core::player::select_best_source;
use zaptv_core::playlist::{ContentType, parse_m3u};
use zaptv_core::proxy::MediaProxy;
use zaptv_core::transcode::{
    DownloadStatus, FfmpegInstaller, SystemTranscoder, TranscodeManager,
};
use zaptv_core::{Result, ZaptvError};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the media proxy and transcode services
    Serve {
        /// Download FFmpeg automatically when no binary is found
        #[arg(long)]
        install_ffmpeg: bool,
    },
    /// Parse a playlist file and print a summary
    Parse {
        /// Path to an M3U/M3U8 playlist file
        file: PathBuf,
    },
    /// Race a channel's sources and print the winner
    Probe {
        /// Path to an M3U/M3U8 playlist file
        file: PathBuf,
        /// Channel id within the playlist
        channel_id: u32,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Serve { install_ffmpeg } => serve(install_ffmpeg).await,
        Commands::Parse { file } => parse_playlist(file).await,
        Commands::Probe { file, channel_id } => probe_channel(file, channel_id).await,
    }
}

/// Start the media proxy, segment server and transcode manager, then run
/// until ctrl-c.
///
/// # Errors
/// - `ZaptvError::Proxy` - Proxy listener could not be bound
/// - `ZaptvError::Transcode` - Segment server or FFmpeg install failed
async fn serve(install_ffmpeg: bool) -> Result<()> {
    let config = ZaptvConfig::default();

    let proxy = MediaProxy::start(config.proxy.clone()).await?;
    println!(
        "Media proxy listening on http://127.0.0.1:{}/stream",
        proxy.port()
    );

    let installer = FfmpegInstaller::new(config.transcode.install_dir.clone());
    let mut ffmpeg_path = installer.locate();
    if ffmpeg_path.is_none() && install_ffmpeg {
        println!("FFmpeg not found, downloading...");
        let path = installer
            .install(|progress| match progress.status {
                DownloadStatus::Downloading => {
                    print!("\rDownloading FFmpeg: {}%", progress.progress);
                }
                DownloadStatus::Extracting => println!("\nExtracting..."),
                DownloadStatus::Complete => println!("Done"),
            })
            .await?;
        ffmpeg_path = Some(path);
    }

    let transcoder = Arc::new(SystemTranscoder::new(ffmpeg_path));
    let (manager, server) =
        TranscodeManager::start_with_server(config.transcode.clone(), transcoder).await?;
    println!(
        "HLS segment server listening on http://127.0.0.1:{}",
        server.port()
    );

    let status = manager.status();
    if status.available {
        match status.path {
            Some(path) => println!("FFmpeg: {}", path.display()),
            None => println!("FFmpeg: available"),
        }
    } else {
        println!("FFmpeg: not found (direct playback only, or rerun with --install-ffmpeg)");
    }

    println!("Press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    println!("Shutting down");
    tracing::info!("Stopping all transcode sessions");
    manager.stop_transcode(None).await;
    Ok(())
}

/// Parse a playlist and print channel/group/category counts.
///
/// # Errors
/// - `ZaptvError::Playlist` - Empty or malformed playlist
/// - `ZaptvError::Io` - File could not be read
async fn parse_playlist(file: PathBuf) -> Result<()> {
    let content = fs::read_to_string(&file).await?;
    let playlist = parse_m3u(&content)?;

    println!("{}: {} channels", file.display(), playlist.channels.len());
    println!("Groups: {}", playlist.groups.len());
    for content_type in ContentType::ALL {
        let count = playlist
            .categories
            .get(&content_type)
            .map_or(0, Vec::len);
        println!("  {content_type:?}: {count}");
    }

    Ok(())
}

/// Race a channel's mirrors and print the index that won.
///
/// # Errors
/// - `ZaptvError::Playlist` - Empty or malformed playlist
/// - `ZaptvError::Configuration` - No channel with the given id
/// - `ZaptvError::Io` - File could not be read
async fn probe_channel(file: PathBuf, channel_id: u32) -> Result<()> {
    let config = ZaptvConfig::default();
    let content = fs::read_to_string(&file).await?;
    let playlist = parse_m3u(&content)?;

    let channel = playlist
        .channel(channel_id)
        .ok_or_else(|| ZaptvError::Configuration {
            reason: format!("no channel with id {channel_id}"),
        })?;

    println!(
        "Probing {} sources for \"{}\"...",
        channel.sources.len(),
        channel.name
    );
    let client = reqwest::Client::new();
    let winner = select_best_source(
        &client,
        &channel.sources,
        config.playback.source_probe_timeout,
    )
    .await;

    println!("Best source: [{winner}] {}", channel.sources[winner]);
    Ok(())
}

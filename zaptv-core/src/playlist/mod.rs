//! Playlist ingestion: M3U parsing and channel categorization.
//!
//! Converts raw M3U/M3U8 playlist text into the channel list consumed by the
//! playback orchestrator and UI. Entries carry optional per-channel HTTP
//! identity (user agent, referrer) and may list several comma-joined mirror
//! URLs for the same content.

mod parser;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use parser::parse_m3u;

/// Content classification derived from URL and group heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Live TV feed (the default classification)
    Live,
    /// Video-on-demand movie
    Movie,
    /// Episodic content
    Series,
    /// A nested playlist URL rather than a playable stream
    Playlist,
}

impl ContentType {
    /// All categories, in the order category maps are populated.
    pub const ALL: [ContentType; 4] = [
        ContentType::Live,
        ContentType::Movie,
        ContentType::Series,
        ContentType::Playlist,
    ];
}

/// A single playlist entry.
///
/// `sources` is never empty and `primary_url == sources[0]`; the orchestrator
/// may adopt a different mirror at play time but never mutates the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Stable within one loaded playlist, renumbered only on deletion
    pub id: u32,
    pub name: String,
    pub logo_url: Option<String>,
    /// Default stream URL, always the first mirror
    pub primary_url: String,
    /// All known mirrors for this content, first is the default
    pub sources: Vec<String>,
    pub group: String,
    pub content_type: ContentType,
    /// Per-channel user agent override from `#EXTVLCOPT`/`user-agent`
    pub user_agent: Option<String>,
    /// Per-channel referrer override from `#EXTVLCOPT`
    pub referrer: Option<String>,
}

/// Parsed playlist: the flat channel list plus group and category indices.
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    pub channels: Vec<Channel>,
    /// group-title -> channel ids, insertion-ordered within a group
    pub groups: HashMap<String, Vec<u32>>,
    /// content type -> channel ids
    pub categories: HashMap<ContentType, Vec<u32>>,
}

impl Playlist {
    /// Looks up a channel by id.
    pub fn channel(&self, id: u32) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Removes a channel and renumbers the remaining ids to stay dense.
    ///
    /// This is the only mutation channels undergo after load.
    pub fn remove_channel(&mut self, id: u32) {
        self.channels.retain(|c| c.id != id);
        for (index, channel) in self.channels.iter_mut().enumerate() {
            channel.id = index as u32;
        }
        self.rebuild_indices();
    }

    fn rebuild_indices(&mut self) {
        self.groups.clear();
        self.categories.clear();
        for channel in &self.channels {
            self.groups
                .entry(channel.group.clone())
                .or_default()
                .push(channel.id);
            self.categories
                .entry(channel.content_type)
                .or_default()
                .push(channel.id);
        }
    }
}

/// Errors produced while ingesting a playlist.
#[derive(Debug, thiserror::Error)]
pub enum PlaylistError {
    #[error("playlist contains no usable entries")]
    Empty,

    #[error("malformed playlist: {reason}")]
    Malformed { reason: String },
}

//! M3U text scanning.
//!
//! The format in the wild is loose: attributes appear in any order inside
//! `#EXTINF`, VLC-specific options ride on `#EXTVLCOPT` lines, and some
//! providers join several mirror URLs for one channel with commas.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::{Channel, ContentType, Playlist, PlaylistError};

static EXTINF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#EXTINF:(-?\d+)(.*),(.*)$").unwrap());
static TVG_LOGO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"tvg-logo="([^"]*)""#).unwrap());
static GROUP_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"group-title="([^"]*)""#).unwrap());
static USER_AGENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"user-agent="([^"]*)""#).unwrap());
static VLCOPT_USER_AGENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)http-user-agent=(.*)").unwrap());
static VLCOPT_REFERRER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)http-referrer=(.*)").unwrap());
static SERIES_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)s\d{1,2}e\d{1,2}").unwrap());
static NESTED_PLAYLIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)type=m3u|get\.php|playlist\.php|\.m3u($|[^8])").unwrap());
static MOVIE_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)movie|film|sinema|vod|\(movie\)").unwrap());
static SERIES_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)series|dizi|season|episode").unwrap());

fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Classifies an entry from its URL, group title and display name.
///
/// Nested playlists win over everything so the player never tries to demux a
/// `.m3u` body; live TV is the fallback.
fn detect_content_type(url: &str, group: &str, name: &str) -> ContentType {
    if NESTED_PLAYLIST.is_match(url) {
        return ContentType::Playlist;
    }
    if url.contains("/movie/") || MOVIE_HINT.is_match(group) || name.to_lowercase().contains("(movie)")
    {
        return ContentType::Movie;
    }
    if url.contains("/series/") || SERIES_HINT.is_match(group) || SERIES_EPISODE.is_match(name) {
        return ContentType::Series;
    }
    ContentType::Live
}

/// A pending entry accumulated between an `#EXTINF` line and its URL line.
#[derive(Default)]
struct PendingEntry {
    name: Option<String>,
    logo: Option<String>,
    group: Option<String>,
    user_agent: Option<String>,
    referrer: Option<String>,
}

/// Parses raw M3U/M3U8 text into a categorized [`Playlist`].
///
/// Strips a UTF-8 BOM, normalizes line endings, and splits comma-joined
/// multi-source URLs so that `primary_url` is always `sources[0]`.
///
/// # Errors
///
/// - `PlaylistError::Empty` - No entry produced both a name and a URL
pub fn parse_m3u(content: &str) -> Result<Playlist, PlaylistError> {
    let content = content.trim_start_matches('\u{feff}');

    let mut entries = Vec::new();
    let mut pending = PendingEntry::default();

    for raw_line in content.lines() {
        let line = raw_line.trim_end_matches('\r').trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("#EXTINF:") {
            pending = PendingEntry::default();
            if let Some(caps) = EXTINF.captures(line) {
                let attrs = caps.get(2).map_or("", |m| m.as_str());
                pending.name = Some(caps.get(3).map_or("", |m| m.as_str()).trim().to_string());
                pending.logo = capture(&TVG_LOGO, attrs).map(str::to_string);
                pending.group = capture(&GROUP_TITLE, attrs).map(str::to_string);
                pending.user_agent = capture(&USER_AGENT, attrs).map(str::to_string);
            }
        } else if let Some(rest) = line.strip_prefix("#EXTVLCOPT:") {
            if let Some(ua) = capture(&VLCOPT_USER_AGENT, rest) {
                pending.user_agent = Some(ua.trim().to_string());
            }
            if let Some(referrer) = capture(&VLCOPT_REFERRER, rest) {
                pending.referrer = Some(referrer.trim().to_string());
            }
        } else if let Some(rest) = line.strip_prefix("#EXTGRP:") {
            let group = rest.trim();
            if !group.is_empty() {
                pending.group = Some(group.to_string());
            }
        } else if !line.starts_with('#') {
            // URL line closes the pending entry
            if pending.name.is_some() {
                entries.push((std::mem::take(&mut pending), line.to_string()));
            }
        }
    }

    build_playlist(entries)
}

fn build_playlist(entries: Vec<(PendingEntry, String)>) -> Result<Playlist, PlaylistError> {
    let mut channels = Vec::new();
    let mut groups: HashMap<String, Vec<u32>> = HashMap::new();
    let mut categories: HashMap<ContentType, Vec<u32>> = HashMap::new();
    for content_type in ContentType::ALL {
        categories.entry(content_type).or_default();
    }

    for (entry, raw_url) in entries {
        // Comma-joined mirrors: first one is the default source
        let sources: Vec<String> = raw_url
            .split(',')
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        let Some(primary_url) = sources.first().cloned() else {
            continue;
        };

        let id = channels.len() as u32;
        let name = match entry.name {
            Some(name) if !name.is_empty() => name,
            _ => format!("Channel {}", id + 1),
        };
        let group = entry.group.unwrap_or_else(|| "Other".to_string());
        let content_type = detect_content_type(&primary_url, &group, &name);

        groups.entry(group.clone()).or_default().push(id);
        categories.entry(content_type).or_default().push(id);
        channels.push(Channel {
            id,
            name,
            logo_url: entry.logo,
            primary_url,
            sources,
            group,
            content_type,
            user_agent: entry.user_agent,
            referrer: entry.referrer,
        });
    }

    if channels.is_empty() {
        return Err(PlaylistError::Empty);
    }

    Ok(Playlist {
        channels,
        groups,
        categories,
    })
}

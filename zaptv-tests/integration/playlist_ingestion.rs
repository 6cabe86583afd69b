//! Playlist ingestion against realistic provider output.

use zaptv_core::playlist::{ContentType, parse_m3u};

const PROVIDER_PLAYLIST: &str = "\u{feff}#EXTM3U\r\n\
#EXTINF:-1 tvg-logo=\"https://logos.example.com/news24.png\" group-title=\"News\",News 24\r\n\
#EXTVLCOPT:http-user-agent=SmartTV/1.0\r\n\
http://cdn-a.example.com/news24/index.m3u8,http://cdn-b.example.com/news24/index.m3u8\r\n\
#EXTINF:-1 group-title=\"Sports\",Sports One HD\r\n\
http://cdn-a.example.com/sports1.ts\r\n\
#EXTINF:-1,Blockbuster Night\r\n\
#EXTGRP:Movies VOD\r\n\
http://vod.example.com/movie/blockbuster-night.mkv\r\n\
#EXTINF:-1 group-title=\"Series\",Crime Scene S02E05\r\n\
http://vod.example.com/series/crime-scene/s02e05.mp4\r\n\
#EXTINF:-1,Provider Bouquet\r\n\
http://portal.example.com/get.php?username=u&password=p&type=m3u\r\n";

#[test]
fn provider_playlist_is_fully_categorized() {
    let playlist = parse_m3u(PROVIDER_PLAYLIST).unwrap();
    assert_eq!(playlist.channels.len(), 5);

    let news = playlist.channel(0).unwrap();
    assert_eq!(news.name, "News 24");
    assert_eq!(news.group, "News");
    assert_eq!(news.sources.len(), 2);
    assert_eq!(news.user_agent.as_deref(), Some("SmartTV/1.0"));
    assert_eq!(
        news.logo_url.as_deref(),
        Some("https://logos.example.com/news24.png")
    );
    assert_eq!(news.content_type, ContentType::Live);

    let sports = playlist.channel(1).unwrap();
    assert_eq!(sports.sources.len(), 1);
    assert_eq!(sports.content_type, ContentType::Live);

    let movie = playlist.channel(2).unwrap();
    assert_eq!(movie.group, "Movies VOD");
    assert_eq!(movie.content_type, ContentType::Movie);

    let series = playlist.channel(3).unwrap();
    assert_eq!(series.content_type, ContentType::Series);

    let nested = playlist.channel(4).unwrap();
    assert_eq!(nested.content_type, ContentType::Playlist);
}

#[test]
fn group_index_matches_channel_fields() {
    let playlist = parse_m3u(PROVIDER_PLAYLIST).unwrap();
    for (group, ids) in &playlist.groups {
        for id in ids {
            assert_eq!(&playlist.channel(*id).unwrap().group, group);
        }
    }
    for content_type in ContentType::ALL {
        for id in playlist.categories.get(&content_type).unwrap() {
            assert_eq!(playlist.channel(*id).unwrap().content_type, content_type);
        }
    }
}

#[test]
fn removing_a_channel_keeps_ids_dense_and_indices_consistent() {
    let mut playlist = parse_m3u(PROVIDER_PLAYLIST).unwrap();
    playlist.remove_channel(1);

    assert_eq!(playlist.channels.len(), 4);
    for (index, channel) in playlist.channels.iter().enumerate() {
        assert_eq!(channel.id, index as u32);
    }
    // The former channel 2 is now channel 1 and still indexed as a movie.
    let movie = playlist.channel(1).unwrap();
    assert_eq!(movie.content_type, ContentType::Movie);
    assert!(
        playlist
            .categories
            .get(&ContentType::Movie)
            .unwrap()
            .contains(&1)
    );
}

#[test]
fn whitespace_only_playlist_is_rejected() {
    assert!(parse_m3u("#EXTM3U\n\n\n").is_err());
}

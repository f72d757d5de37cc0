//! Playlist source: turns playlist files into `RequestedTrack`s.
//!
//! Supported inputs:
//! - JSON: a bare array of tracks, `{"tracks": [...]}`, or a SongShift
//!   document (`[{"tracks": [...]}, ...]`). Array items are objects with
//!   `artist`, `album`, `title` (or `track`/`name`), `isrc`, `path`, or
//!   plain "Artist - Title" strings.
//! - M3U / M3U8 / TXT: `#EXTINF:<secs>,Artist - Title` annotates the next
//!   entry; entry lines are file paths or "Artist - Title" text.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{MatchError, Result};
use crate::models::RequestedTrack;

const AUDIO_EXTENSIONS: &[&str] = &["flac", "mp3", "m4a", "aac", "ogg", "opus", "wav", "aiff", "alac", "wv", "ape"];

/// Read a playlist file, dispatching on its extension.
pub fn read_playlist(path: &Path) -> Result<Vec<RequestedTrack>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let text = std::fs::read_to_string(path)?;
    let text = text.trim_start_matches('\u{FEFF}');

    let tracks = match extension.as_str() {
        "json" => parse_json_playlist(text)?,
        "m3u" | "m3u8" | "txt" => parse_m3u(text),
        other => {
            return Err(MatchError::Playlist(format!(
                "unsupported playlist format {:?} for {}",
                other,
                path.display()
            )))
        }
    };

    info!("Read {} tracks from {:?}", tracks.len(), path);
    Ok(tracks)
}

// ============================================================================
// JSON
// ============================================================================

pub fn parse_json_playlist(text: &str) -> Result<Vec<RequestedTrack>> {
    let data: Value = serde_json::from_str(text)?;

    let items = match &data {
        Value::Array(items) => match items.first() {
            Some(Value::Object(first)) if first.get("tracks").map_or(false, Value::is_array) => {
                first.get("tracks").and_then(Value::as_array).cloned().unwrap_or_default()
            }
            _ => items.clone(),
        },
        Value::Object(obj) => match obj.get("tracks") {
            Some(Value::Array(items)) => items.clone(),
            _ => {
                return Err(MatchError::Playlist(
                    "JSON object playlist has no \"tracks\" array".to_string(),
                ))
            }
        },
        _ => {
            return Err(MatchError::Playlist(
                "JSON playlist must be an array or an object with \"tracks\"".to_string(),
            ))
        }
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(map) => Ok(track_from_object(map)),
            Value::String(s) => Ok(track_from_text(s)),
            other => Err(MatchError::Playlist(format!(
                "playlist item #{} is neither an object nor a string: {}",
                i + 1,
                other
            ))),
        })
        .collect()
}

/// First non-empty string among `keys`. Numbers are accepted as text.
fn field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match map.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn track_from_object(map: &Map<String, Value>) -> RequestedTrack {
    RequestedTrack {
        artist: field(map, &["artist", "artists"]).unwrap_or_default(),
        album: field(map, &["album"]).unwrap_or_default(),
        title: field(map, &["title", "track", "name"]).unwrap_or_default(),
        isrc: field(map, &["isrc"]),
        source_path: field(map, &["path", "source_path"]),
    }
}

// ============================================================================
// M3U / TXT
// ============================================================================

/// Split "Artist - Title"; text without a separator is all title.
pub fn split_artist_title(text: &str) -> (String, String) {
    let text = text.trim();
    for sep in [" - ", " – ", " — "] {
        if let Some((artist, title)) = text.split_once(sep) {
            if !artist.trim().is_empty() && !title.trim().is_empty() {
                return (artist.trim().to_string(), title.trim().to_string());
            }
        }
    }
    (String::new(), text.to_string())
}

fn track_from_text(text: &str) -> RequestedTrack {
    let (artist, title) = split_artist_title(text);
    RequestedTrack {
        artist,
        title,
        ..Default::default()
    }
}

/// A playlist line naming a file rather than a track.
fn looks_like_path(line: &str) -> bool {
    if line.contains('/') || line.contains('\\') || line.starts_with("file:") {
        return true;
    }
    Path::new(line)
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// Display text of an `#EXTINF:<secs>,<text>` line.
fn extinf_text(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("#EXTINF:")?;
    rest.split_once(',').map(|(_, text)| text.trim())
}

pub fn parse_m3u(text: &str) -> Vec<RequestedTrack> {
    let mut tracks = Vec::new();
    let mut pending_info: Option<String> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') {
            if let Some(info) = extinf_text(line) {
                pending_info = Some(info.to_string());
            }
            continue;
        }

        let info = pending_info.take();
        let track = if looks_like_path(line) {
            let path = line.strip_prefix("file://").unwrap_or(line);
            let described = info.or_else(|| {
                Path::new(path)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            });
            let mut track = described.as_deref().map(track_from_text).unwrap_or_default();
            track.source_path = Some(path.to_string());
            track
        } else {
            track_from_text(info.as_deref().unwrap_or(line))
        };
        debug!("Playlist entry: {}", track.display_name());
        tracks.push(track);
    }

    tracks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_bare_array() {
        let tracks = parse_json_playlist(
            r#"[{"artist": "The Beatles", "title": "Hey Jude", "isrc": "GBAYE6800011"},
                {"artist": "Queen", "track": "Bohemian Rhapsody", "album": "A Night at the Opera"},
                "Muse - Uprising"]"#,
        )
        .unwrap();
        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[0].isrc.as_deref(), Some("GBAYE6800011"));
        assert_eq!(tracks[1].title, "Bohemian Rhapsody");
        assert_eq!(tracks[1].album, "A Night at the Opera");
        assert_eq!(tracks[2].artist, "Muse");
        assert_eq!(tracks[2].title, "Uprising");
    }

    #[test]
    fn test_json_tracks_object_and_songshift() {
        let tracks = parse_json_playlist(r#"{"tracks": [{"artist": "A", "title": "B"}]}"#).unwrap();
        assert_eq!(tracks.len(), 1);

        let tracks = parse_json_playlist(
            r#"[{"service": "qobuz", "serviceId": null, "name": "Mix",
                 "tracks": [{"artist": "A", "track": "B"}, {"artist": "C", "track": "D"}]}]"#,
        )
        .unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[1].artist, "C");
        assert_eq!(tracks[1].title, "D");
    }

    #[test]
    fn test_json_rejects_scalars() {
        assert!(matches!(parse_json_playlist("42"), Err(MatchError::Playlist(_))));
        assert!(matches!(parse_json_playlist("[1, 2]"), Err(MatchError::Playlist(_))));
        assert!(parse_json_playlist("not json").is_err());
    }

    #[test]
    fn test_m3u_with_extinf_and_paths() {
        let text = "#EXTM3U\n\
                    #EXTINF:431,The Beatles - Hey Jude\n\
                    /music/beatles/hey_jude.flac\n\
                    \n\
                    /music/Queen - Bohemian Rhapsody.flac\n\
                    Muse - Uprising\n";
        let tracks = parse_m3u(text);
        assert_eq!(tracks.len(), 3);

        assert_eq!(tracks[0].artist, "The Beatles");
        assert_eq!(tracks[0].title, "Hey Jude");
        assert_eq!(tracks[0].source_path.as_deref(), Some("/music/beatles/hey_jude.flac"));

        assert_eq!(tracks[1].artist, "Queen");
        assert_eq!(tracks[1].title, "Bohemian Rhapsody");
        assert!(tracks[1].source_path.is_some());

        assert_eq!(tracks[2].artist, "Muse");
        assert_eq!(tracks[2].source_path, None);
    }

    #[test]
    fn test_split_artist_title() {
        assert_eq!(split_artist_title("A - B - C"), ("A".to_string(), "B - C".to_string()));
        assert_eq!(split_artist_title("Just A Title"), (String::new(), "Just A Title".to_string()));
        assert_eq!(split_artist_title(" - Title"), (String::new(), "- Title".to_string()));
    }

    #[test]
    fn test_read_playlist_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("list.json");
        std::fs::write(&json, r#"[{"artist": "A", "title": "B"}]"#).unwrap();
        assert_eq!(read_playlist(&json).unwrap().len(), 1);

        let csv = dir.path().join("list.csv");
        std::fs::write(&csv, "artist,title\nA,B\n").unwrap();
        assert!(matches!(read_playlist(&csv), Err(MatchError::Playlist(_))));
    }
}

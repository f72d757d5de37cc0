//! Export writers for finished match runs.

use std::path::Path;

use serde_json::json;
use tracing::info;

use crate::error::Result;
use crate::models::{Decision, MatchResult, MatchRun};

pub const DEFAULT_SONGSHIFT_SERVICE: &str = "qobuz";
pub const DEFAULT_SONGSHIFT_NAME: &str = "Unmatched Tracks";
const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// M3U playlist of every auto-accepted match, in playlist order.
pub fn m3u_document(results: &[MatchResult]) -> String {
    let mut out = String::from("#EXTM3U\n");
    for result in results.iter().filter(|r| r.decision == Decision::Auto) {
        let Some(entry) = result.candidate.as_ref() else {
            continue;
        };
        let artist = if entry.artist().is_empty() { result.requested.artist.as_str() } else { entry.artist() };
        let title = if entry.title().is_empty() { result.requested.title.as_str() } else { entry.title() };
        out.push_str(&format!("#EXTINF:-1,{} - {}\n{}\n", artist, title, entry.path()));
    }
    out
}

/// Write the auto-accepted matches as M3U. Returns the number of entries.
pub fn write_m3u(results: &[MatchResult], path: &Path) -> Result<usize> {
    let count = results
        .iter()
        .filter(|r| r.decision == Decision::Auto && r.candidate.is_some())
        .count();
    std::fs::write(path, m3u_document(results))?;
    info!("Wrote {} auto matches to {:?}", count, path);
    Ok(count)
}

/// Write the whole run (results, diagnostics, stats) as pretty JSON.
pub fn write_json(run: &MatchRun, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(run)?;
    std::fs::write(path, json)?;
    info!("Wrote {} results to {:?}", run.results.len(), path);
    Ok(())
}

/// SongShift import document listing the unmatched tracks.
pub fn songshift_document(results: &[MatchResult], name: &str, service: &str) -> serde_json::Value {
    let tracks: Vec<serde_json::Value> = results
        .iter()
        .filter(|r| r.decision == Decision::Unmatched)
        .filter(|r| !r.requested.title.trim().is_empty())
        .map(|r| {
            let artist = r.requested.artist.trim();
            json!({
                "artist": if artist.is_empty() { UNKNOWN_ARTIST } else { artist },
                "track": r.requested.title.trim(),
            })
        })
        .collect();

    json!([{
        "service": service,
        "serviceId": null,
        "name": name,
        "tracks": tracks,
    }])
}

/// Write unmatched tracks as a SongShift document. Returns the track count.
pub fn write_songshift(results: &[MatchResult], path: &Path, name: &str, service: &str) -> Result<usize> {
    let document = songshift_document(results, name, service);
    let count = document[0]["tracks"].as_array().map_or(0, Vec::len);
    std::fs::write(path, serde_json::to_string_pretty(&document)?)?;
    info!("Wrote {} unmatched tracks to {:?} ({})", count, path, name);
    Ok(count)
}

//! Core data models for playlist matching.
//!
//! This module contains the catalog and playlist records, the match results
//! handed to export/review collaborators, diagnostics, and run statistics.

use serde::{Deserialize, Serialize};

// ============================================================================
// Catalog Models
// ============================================================================

/// Raw catalog row as produced by the catalog collaborator (one per audio file).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub path: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub track_number: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
}

impl CatalogRecord {
    pub fn new(path: &str, artist: &str, album: &str, title: &str) -> Self {
        Self {
            path: path.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            title: title.to_string(),
            track_number: None,
            isrc: None,
        }
    }

    pub fn with_isrc(mut self, isrc: &str) -> Self {
        self.isrc = Some(isrc.to_string());
        self
    }

    pub fn with_track_number(mut self, track_number: &str) -> Self {
        self.track_number = Some(track_number.to_string());
        self
    }
}

/// Indexed catalog entry: the raw record plus normalized fields computed once
/// at index build time.
///
/// Fields are private so the normalized forms can never drift from the raw
/// tags they were derived from. Entries are immutable for the whole run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    path: String,
    artist: String,
    album: String,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    track_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    isrc: Option<String>,
    #[serde(skip)]
    normalized: NormalizedFields,
}

/// Normalized forms of a catalog record (or a requested track).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NormalizedFields {
    pub artist: String,
    pub title: String,
    pub search_string: String,
    /// Artist bucket key ("the" prefix removed)
    pub artist_key: String,
    /// Bucket key of the first credited artist, when it differs from `artist_key`
    pub primary_artist_key: Option<String>,
    /// Canonical ISRC (uppercase, no separators), when valid
    pub isrc: Option<String>,
}

impl CatalogEntry {
    pub(crate) fn from_record(record: CatalogRecord, normalized: NormalizedFields) -> Self {
        Self {
            path: record.path,
            artist: record.artist,
            album: record.album,
            title: record.title,
            track_number: record.track_number,
            isrc: record.isrc,
            normalized,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn album(&self) -> &str {
        &self.album
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn track_number(&self) -> Option<&str> {
        self.track_number.as_deref()
    }

    pub fn isrc(&self) -> Option<&str> {
        self.isrc.as_deref()
    }

    pub fn normalized_artist(&self) -> &str {
        &self.normalized.artist
    }

    pub fn normalized_title(&self) -> &str {
        &self.normalized.title
    }

    pub fn normalized_search_string(&self) -> &str {
        &self.normalized.search_string
    }

    pub fn normalized(&self) -> &NormalizedFields {
        &self.normalized
    }
}

// ============================================================================
// Playlist Models
// ============================================================================

/// One requested playlist entry, as produced by the playlist collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedTrack {
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default, alias = "track", alias = "name")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
    /// File path named by the playlist itself (e.g. an M3U line)
    #[serde(default, alias = "path", skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
}

impl RequestedTrack {
    pub fn new(artist: &str, title: &str) -> Self {
        Self {
            artist: artist.to_string(),
            title: title.to_string(),
            ..Default::default()
        }
    }

    pub fn with_album(mut self, album: &str) -> Self {
        self.album = album.to_string();
        self
    }

    pub fn with_isrc(mut self, isrc: &str) -> Self {
        self.isrc = Some(isrc.to_string());
        self
    }

    pub fn with_source_path(mut self, path: &str) -> Self {
        self.source_path = Some(path.to_string());
        self
    }

    /// True when the entry carries nothing the matcher could use.
    pub fn is_blank(&self) -> bool {
        self.artist.trim().is_empty()
            && self.title.trim().is_empty()
            && self.album.trim().is_empty()
            && self.isrc.as_deref().map_or(true, |s| s.trim().is_empty())
            && self.source_path.as_deref().map_or(true, |s| s.trim().is_empty())
    }

    /// "Artist - Title" label for logs and summaries.
    pub fn display_name(&self) -> String {
        match (self.artist.trim(), self.title.trim()) {
            ("", "") => self.source_path.clone().unwrap_or_else(|| "<empty>".to_string()),
            ("", title) => title.to_string(),
            (artist, "") => artist.to_string(),
            (artist, title) => format!("{} - {}", artist, title),
        }
    }
}

// ============================================================================
// Match Outcome Enums
// ============================================================================

/// How a match was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMethod {
    ExactPath,
    Scored,
    None,
}

/// Threshold decision for a requested track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Auto,
    Review,
    Unmatched,
}

impl Decision {
    /// Classify a score against the configured thresholds.
    /// `None` (no candidate considered) is always unmatched.
    pub fn classify(score: Option<u8>, auto_threshold: u8, review_min_threshold: u8) -> Self {
        match score {
            Some(s) if s >= auto_threshold => Decision::Auto,
            Some(s) if s >= review_min_threshold => Decision::Review,
            _ => Decision::Unmatched,
        }
    }
}

/// Which index lookup produced a track's candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalStrategy {
    /// Artist bucket intersected with title-token buckets
    ArtistTitle,
    ArtistOnly,
    TitleTokens,
    FullScan,
    /// Only ISRC hits were found
    Isrc,
    /// Nothing retrieved
    Empty,
}

/// Whether a run executed on the caller's thread or on the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

// ============================================================================
// Diagnostics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    MalformedEntry,
    ScoringFailure,
    CacheCorruption,
}

/// Recovered (non-fatal) problem reported alongside results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::MalformedEntry,
            message: message.into(),
        }
    }

    pub fn scoring_failure(message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::ScoringFailure,
            message: message.into(),
        }
    }

    pub fn cache_corruption(message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::CacheCorruption,
            message: message.into(),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Candidate considered for a track, kept for diagnostic display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScoredCandidate {
    pub path: String,
    pub artist: String,
    pub album: String,
    pub title: String,
    pub score: u8,
}

impl ScoredCandidate {
    pub fn from_entry(entry: &CatalogEntry, score: u8) -> Self {
        Self {
            path: entry.path().to_string(),
            artist: entry.artist().to_string(),
            album: entry.album().to_string(),
            title: entry.title().to_string(),
            score,
        }
    }
}

/// Outcome for one requested track.
///
/// ## Key Invariants
///
/// - `decision == Auto` requires `score >= auto_threshold`
/// - `decision == Review` requires `review_min_threshold <= score < auto_threshold`
/// - `decision == Unmatched` otherwise; `candidate` is then `None`
/// - `score == None` exactly when no candidate was considered
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub requested: RequestedTrack,
    pub candidate: Option<CatalogEntry>,
    pub score: Option<u8>,
    pub method: MatchMethod,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalStrategy>,
    /// Descending score, ties in candidate order, at most `top_k` long
    pub top_candidates: Vec<ScoredCandidate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl MatchResult {
    /// Result for a track that never reached scoring.
    pub fn unmatched(requested: RequestedTrack) -> Self {
        Self {
            requested,
            candidate: None,
            score: None,
            method: MatchMethod::None,
            decision: Decision::Unmatched,
            retrieval: None,
            top_candidates: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn candidate_path(&self) -> Option<&str> {
        self.candidate.as_ref().map(|c| c.path())
    }
}

/// Everything a match run hands back to the caller.
#[derive(Clone, Debug, Serialize)]
pub struct MatchRun {
    /// One result per processed track, in playlist order
    pub results: Vec<MatchResult>,
    /// Run-level diagnostics (skipped catalog records, cache problems)
    pub diagnostics: Vec<Diagnostic>,
    pub stats: MatchingStats,
    pub mode: ExecutionMode,
    /// True when the caller aborted the run; `results` then holds only the
    /// tracks classified before the abort
    pub cancelled: bool,
}

impl MatchRun {
    pub fn auto(&self) -> impl Iterator<Item = &MatchResult> {
        self.with_decision(Decision::Auto)
    }

    pub fn needs_review(&self) -> impl Iterator<Item = &MatchResult> {
        self.with_decision(Decision::Review)
    }

    pub fn unmatched(&self) -> impl Iterator<Item = &MatchResult> {
        self.with_decision(Decision::Unmatched)
    }

    fn with_decision(&self, decision: Decision) -> impl Iterator<Item = &MatchResult> {
        self.results.iter().filter(move |r| r.decision == decision)
    }
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Per-run matching statistics.
/// Derived from the finished results, so workers never share counters.
#[derive(Default, Debug, Clone, Serialize)]
pub struct MatchingStats {
    pub total_tracks: usize,
    pub processed_tracks: usize,
    pub catalog_entries: usize,

    // Decisions
    pub auto_matches: usize,
    pub review_matches: usize,
    pub unmatched: usize,

    // Methods
    pub exact_path_matches: usize,
    pub isrc_matches: usize,
    pub scored_matches: usize,

    // Retrieval strategies
    pub retrieval_artist_title: usize,
    pub retrieval_artist_only: usize,
    pub retrieval_title_tokens: usize,
    pub retrieval_full_scan: usize,
    pub retrieval_isrc: usize,
    pub retrieval_empty: usize,
    pub candidates_scored: usize,

    // Recovered problems
    pub scoring_failures: usize,
    pub malformed_tracks: usize,
    pub skipped_catalog_records: usize,

    // Cache
    pub cache_hits: usize,
    pub cache_misses: usize,

    // Timing
    pub elapsed_seconds: f64,
}

impl MatchingStats {
    /// Auto-match rate as a percentage of processed tracks
    pub fn match_rate(&self) -> f64 {
        if self.processed_tracks == 0 {
            0.0
        } else {
            100.0 * self.auto_matches as f64 / self.processed_tracks as f64
        }
    }

    /// Count one finished result.
    pub fn record(&mut self, result: &MatchResult) {
        self.processed_tracks += 1;
        match result.decision {
            Decision::Auto => self.auto_matches += 1,
            Decision::Review => self.review_matches += 1,
            Decision::Unmatched => self.unmatched += 1,
        }
        match result.method {
            MatchMethod::ExactPath => self.exact_path_matches += 1,
            MatchMethod::Scored => self.scored_matches += 1,
            MatchMethod::None => {}
        }
        if let (Some(candidate), Some(isrc)) = (&result.candidate, result.requested.isrc.as_deref()) {
            let requested = crate::normalize::canonical_isrc(isrc);
            if requested.is_some() && requested == candidate.normalized().isrc {
                self.isrc_matches += 1;
            }
        }
        if let Some(strategy) = result.retrieval {
            match strategy {
                RetrievalStrategy::ArtistTitle => self.retrieval_artist_title += 1,
                RetrievalStrategy::ArtistOnly => self.retrieval_artist_only += 1,
                RetrievalStrategy::TitleTokens => self.retrieval_title_tokens += 1,
                RetrievalStrategy::FullScan => self.retrieval_full_scan += 1,
                RetrievalStrategy::Isrc => self.retrieval_isrc += 1,
                RetrievalStrategy::Empty => self.retrieval_empty += 1,
            }
        }
        for diagnostic in &result.diagnostics {
            match diagnostic.kind {
                DiagnosticKind::ScoringFailure => self.scoring_failures += 1,
                DiagnosticKind::MalformedEntry => self.malformed_tracks += 1,
                DiagnosticKind::CacheCorruption => {}
            }
        }
    }

    /// Log stats in JSON format
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            tracing::info!("[STATS:{}]\n{}", phase, json);
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

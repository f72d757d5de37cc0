//! In-memory candidate index over a catalog snapshot.
//!
//! Built once per run and never mutated afterwards, so it can be shared by
//! reference across worker threads. Entries are stored in catalog order and
//! buckets hold positions into that vector; every lookup returns positions in
//! ascending order, which is what makes tie-breaking deterministic.

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::error::{MatchError, Result};
use crate::models::{CatalogEntry, CatalogRecord, Diagnostic, NormalizedFields, RetrievalStrategy};
use crate::normalize::normalized_fields;

/// Candidate positions retrieved for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieval {
    /// ISRC hits first, then the strategy's bucket, de-duplicated
    pub candidates: Vec<usize>,
    pub strategy: RetrievalStrategy,
    pub isrc_hits: usize,
}

pub struct CandidateIndex {
    entries: Vec<CatalogEntry>,
    by_artist: FxHashMap<String, Vec<usize>>,
    by_title_token: FxHashMap<String, Vec<usize>>,
    by_isrc: FxHashMap<String, Vec<usize>>,
    by_path: FxHashMap<String, usize>,
    min_token_len: usize,
    full_scan_limit: usize,
}

/// Distinct title tokens at least `min_len` characters long, in title order.
pub fn title_tokens(normalized_title: &str, min_len: usize) -> Vec<&str> {
    let mut seen = FxHashSet::default();
    normalized_title
        .split_whitespace()
        .filter(|t| t.chars().count() >= min_len)
        .filter(|t| seen.insert(*t))
        .collect()
}

/// Sorted, de-duplicated union of several buckets.
fn union_of<'a>(buckets: impl Iterator<Item = &'a Vec<usize>>) -> Vec<usize> {
    let mut out: Vec<usize> = buckets.flatten().copied().collect();
    out.sort_unstable();
    out.dedup();
    out
}

impl CandidateIndex {
    /// Build the index from catalog records.
    ///
    /// Records with an empty or duplicate path, or with no artist, title and
    /// album, are skipped and reported. Fails with `CatalogUnavailable` when
    /// nothing indexable remains.
    pub fn build<I, F>(
        records: I,
        normalize: F,
        min_token_len: usize,
        full_scan_limit: usize,
    ) -> Result<(Self, Vec<Diagnostic>)>
    where
        I: IntoIterator<Item = CatalogRecord>,
        F: Fn(&str) -> String + Sync,
    {
        let mut diagnostics = Vec::new();
        let mut seen_paths = FxHashSet::default();
        let mut valid = Vec::new();
        let mut total = 0usize;

        for record in records {
            total += 1;
            if let Err(e) = check_record(&record, total, &mut seen_paths) {
                diagnostics.push(Diagnostic::malformed(e.to_string()));
                continue;
            }
            valid.push(record);
        }

        for diagnostic in &diagnostics {
            warn!("Skipping catalog record: {}", diagnostic.message);
        }

        if valid.is_empty() {
            return Err(MatchError::CatalogUnavailable(if total == 0 {
                "catalog snapshot is empty".to_string()
            } else {
                format!("none of the {} catalog records could be indexed", total)
            }));
        }

        // Normalization dominates build time; order is preserved by collect
        let normalized: Vec<NormalizedFields> = valid
            .par_iter()
            .map(|r| {
                normalized_fields(
                    &normalize,
                    &r.artist,
                    &r.album,
                    &r.title,
                    r.track_number.as_deref(),
                    r.isrc.as_deref(),
                )
            })
            .collect();

        let mut index = Self {
            entries: Vec::with_capacity(valid.len()),
            by_artist: FxHashMap::default(),
            by_title_token: FxHashMap::default(),
            by_isrc: FxHashMap::default(),
            by_path: FxHashMap::default(),
            min_token_len,
            full_scan_limit,
        };

        for (pos, (record, fields)) in valid.into_iter().zip(normalized).enumerate() {
            index.insert(pos, CatalogEntry::from_record(record, fields));
        }

        info!(
            "Indexed {} catalog entries ({} artist keys, {} title tokens, {} ISRCs, {} skipped)",
            index.entries.len(),
            index.by_artist.len(),
            index.by_title_token.len(),
            index.by_isrc.len(),
            diagnostics.len()
        );

        Ok((index, diagnostics))
    }

    fn insert(&mut self, pos: usize, entry: CatalogEntry) {
        let fields = entry.normalized();
        if !fields.artist_key.is_empty() {
            self.by_artist.entry(fields.artist_key.clone()).or_default().push(pos);
        }
        if let Some(primary) = &fields.primary_artist_key {
            self.by_artist.entry(primary.clone()).or_default().push(pos);
        }
        for token in title_tokens(&fields.title, self.min_token_len) {
            self.by_title_token.entry(token.to_string()).or_default().push(pos);
        }
        if let Some(isrc) = &fields.isrc {
            self.by_isrc.entry(isrc.clone()).or_default().push(pos);
        }
        self.by_path.insert(entry.path().trim().to_string(), pos);
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, pos: usize) -> &CatalogEntry {
        &self.entries[pos]
    }

    /// Every entry, in catalog order.
    pub fn all_entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn full_scan_limit(&self) -> usize {
        self.full_scan_limit
    }

    pub fn lookup_path(&self, path: &str) -> Option<&CatalogEntry> {
        self.by_path.get(path.trim()).map(|&pos| &self.entries[pos])
    }

    pub fn candidates_by_artist(&self, normalized_artist: &str) -> Vec<&CatalogEntry> {
        let key = crate::normalize::artist_key(normalized_artist);
        self.resolve(self.by_artist.get(&key))
    }

    pub fn candidates_by_title_token(&self, token: &str) -> Vec<&CatalogEntry> {
        if token.chars().count() < self.min_token_len {
            return Vec::new();
        }
        self.resolve(self.by_title_token.get(token))
    }

    pub fn candidates_by_isrc(&self, canonical_isrc: &str) -> Vec<&CatalogEntry> {
        self.resolve(self.by_isrc.get(canonical_isrc))
    }

    fn resolve(&self, bucket: Option<&Vec<usize>>) -> Vec<&CatalogEntry> {
        bucket
            .map(|positions| positions.iter().map(|&p| &self.entries[p]).collect())
            .unwrap_or_default()
    }

    /// Candidate retrieval for one normalized query.
    ///
    /// First non-empty of: artist ∩ title tokens, artist only, title-token
    /// union (bounded by the full-scan limit), full scan (small catalogs
    /// only). ISRC hits are always prepended.
    pub fn retrieve(&self, query: &NormalizedFields) -> Retrieval {
        let isrc_hits: Vec<usize> = query
            .isrc
            .as_ref()
            .and_then(|isrc| self.by_isrc.get(isrc))
            .cloned()
            .unwrap_or_default();

        let artist_keys = std::iter::once(&query.artist_key)
            .chain(query.primary_artist_key.as_ref())
            .filter(|k| !k.is_empty());
        let by_artist = union_of(artist_keys.filter_map(|k| self.by_artist.get(k)));

        let tokens = title_tokens(&query.title, self.min_token_len);
        let by_title = union_of(tokens.iter().filter_map(|t| self.by_title_token.get(*t)));

        let (mut candidates, mut strategy) = if !by_artist.is_empty() && !by_title.is_empty() {
            let both: Vec<usize> = by_artist
                .iter()
                .copied()
                .filter(|p| by_title.binary_search(p).is_ok())
                .collect();
            if both.is_empty() {
                (by_artist, RetrievalStrategy::ArtistOnly)
            } else {
                (both, RetrievalStrategy::ArtistTitle)
            }
        } else if !by_artist.is_empty() {
            (by_artist, RetrievalStrategy::ArtistOnly)
        } else if !by_title.is_empty() && by_title.len() <= self.full_scan_limit {
            (by_title, RetrievalStrategy::TitleTokens)
        } else if self.entries.len() <= self.full_scan_limit {
            ((0..self.entries.len()).collect(), RetrievalStrategy::FullScan)
        } else {
            (Vec::new(), RetrievalStrategy::Empty)
        };

        if !isrc_hits.is_empty() {
            candidates.retain(|p| !isrc_hits.contains(p));
            if candidates.is_empty() {
                strategy = RetrievalStrategy::Isrc;
            }
            let mut merged = isrc_hits.clone();
            merged.extend(candidates);
            candidates = merged;
        }

        debug!(
            "Retrieved {} candidates via {:?} (artist={:?}, title={:?})",
            candidates.len(),
            strategy,
            query.artist_key,
            query.title
        );

        Retrieval {
            candidates,
            strategy,
            isrc_hits: isrc_hits.len(),
        }
    }
}

/// Reject a record that cannot be indexed. Accepted paths are added to `seen_paths`.
fn check_record(record: &CatalogRecord, position: usize, seen_paths: &mut FxHashSet<String>) -> Result<()> {
    let path = record.path.trim();
    if path.is_empty() {
        return Err(MatchError::MalformedEntry(format!(
            "catalog record #{} has an empty path",
            position
        )));
    }
    if record.artist.trim().is_empty() && record.title.trim().is_empty() && record.album.trim().is_empty() {
        return Err(MatchError::MalformedEntry(format!(
            "catalog record {} has no artist, title or album",
            path
        )));
    }
    if !seen_paths.insert(path.to_string()) {
        return Err(MatchError::MalformedEntry(format!(
            "catalog record {} duplicates an earlier path",
            path
        )));
    }
    Ok(())
}

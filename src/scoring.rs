//! Similarity scoring between a normalized request and a catalog entry.
//!
//! This module contains:
//! - String similarity primitives (edit-distance ratio, token-set ratio, token overlap)
//! - The `Scorer` trait the matcher scores through
//! - `WeightedScorer`, the default field-weighted scorer

use rustc_hash::FxHashSet;
use serde::Serialize;
use strsim::normalized_levenshtein;

use crate::config::{FieldWeights, MatchConfig, DEFAULT_MAX_FIELD_LEN};
use crate::error::{MatchError, Result};
use crate::models::{CatalogEntry, NormalizedFields};

/// Score given to an exact ISRC hit
pub const ISRC_MATCH_SCORE: u8 = 100;

// ============================================================================
// Similarity Primitives (0.0 to 100.0)
// ============================================================================

/// Edit-distance ratio of two normalized strings.
/// An empty side scores 0: a missing field never counts as agreement.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(a, b) * 100.0
}

/// Token-set ratio: order- and duplicate-insensitive comparison.
///
/// Compares the sorted shared tokens against each side's sorted tokens, so a
/// string whose words are all contained in the other scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let set_a: FxHashSet<&str> = a.split_whitespace().collect();
    let set_b: FxHashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let sorted_join = |mut tokens: Vec<&str>| {
        tokens.sort_unstable();
        tokens.join(" ")
    };
    let shared = sorted_join(set_a.intersection(&set_b).copied().collect());
    let only_a = sorted_join(set_a.difference(&set_b).copied().collect());
    let only_b = sorted_join(set_b.difference(&set_a).copied().collect());

    let combine = |rest: &str| match (shared.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => shared.clone(),
        (false, false) => format!("{} {}", shared, rest),
    };
    let with_a = combine(&only_a);
    let with_b = combine(&only_b);

    ratio(&shared, &with_a)
        .max(ratio(&shared, &with_b))
        .max(ratio(&with_a, &with_b))
}

/// Jaccard overlap of word tokens.
pub fn token_overlap(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 100.0;
    }

    let tokens_a: FxHashSet<&str> = a.split_whitespace().collect();
    let tokens_b: FxHashSet<&str> = b.split_whitespace().collect();

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();

    100.0 * intersection as f64 / union as f64
}

/// Title/artist field similarity: robust to reordering without letting a
/// single shared word count as a full match.
pub fn field_similarity(a: &str, b: &str) -> f64 {
    ratio(a, b).max(token_overlap(a, b))
}

/// Full search-string similarity.
pub fn full_similarity(a: &str, b: &str) -> f64 {
    ratio(a, b).max(token_set_ratio(a, b))
}

/// Artist similarity over the full names and the primary-artist keys.
pub fn artist_similarity(query: &NormalizedFields, candidate: &NormalizedFields) -> f64 {
    let query_keys = std::iter::once(&query.artist_key).chain(query.primary_artist_key.as_ref());
    let mut best = field_similarity(&query.artist, &candidate.artist);
    for q in query_keys {
        for c in std::iter::once(&candidate.artist_key).chain(candidate.primary_artist_key.as_ref()) {
            best = best.max(field_similarity(q, c));
        }
    }
    best
}

// ============================================================================
// Scorer
// ============================================================================

/// Scores one candidate for one normalized request, in [0, 100].
///
/// Implementations are shared by reference across worker threads.
/// An `Err` excludes that candidate only.
pub trait Scorer: Send + Sync {
    fn score(&self, query: &NormalizedFields, candidate: &CatalogEntry) -> Result<u8>;
}

/// Per-measure sub-scores, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub title: f64,
    pub artist: f64,
    pub full: f64,
    pub isrc_match: bool,
    pub total: u8,
}

/// Field-weighted combination of title, artist and full-string similarity.
#[derive(Debug, Clone)]
pub struct WeightedScorer {
    weights: FieldWeights,
    max_field_len: usize,
}

impl Default for WeightedScorer {
    fn default() -> Self {
        Self::new(FieldWeights::default(), DEFAULT_MAX_FIELD_LEN)
    }
}

impl WeightedScorer {
    pub fn new(weights: FieldWeights, max_field_len: usize) -> Self {
        Self {
            weights,
            max_field_len,
        }
    }

    pub fn from_config(config: &MatchConfig) -> Self {
        Self::new(config.weights, config.max_field_len)
    }

    fn check_fields(&self, candidate: &CatalogEntry) -> Result<()> {
        for (name, value) in [
            ("artist", candidate.artist()),
            ("album", candidate.album()),
            ("title", candidate.title()),
        ] {
            if value.chars().count() > self.max_field_len {
                return Err(MatchError::ScoringFailure(format!(
                    "{} of {} exceeds {} characters",
                    name,
                    candidate.path(),
                    self.max_field_len
                )));
            }
        }
        Ok(())
    }

    /// Compute every sub-measure and the weighted total.
    pub fn breakdown(&self, query: &NormalizedFields, candidate: &CatalogEntry) -> Result<ScoreBreakdown> {
        self.check_fields(candidate)?;
        let fields = candidate.normalized();

        let isrc_match = matches!((&query.isrc, &fields.isrc), (Some(q), Some(c)) if q == c);
        let title = field_similarity(&query.title, &fields.title);
        let artist = artist_similarity(query, fields);
        let full = full_similarity(&query.search_string, &fields.search_string);

        let total = if isrc_match {
            ISRC_MATCH_SCORE
        } else {
            self.combine(title, artist, full)
        };

        Ok(ScoreBreakdown {
            title,
            artist,
            full,
            isrc_match,
            total,
        })
    }

    fn combine(&self, title: f64, artist: f64, full: f64) -> u8 {
        let w = &self.weights;
        let total = w.total();
        if total <= 0.0 {
            return 0;
        }
        let weighted = (w.title * title + w.artist * artist + w.full * full) / total;
        weighted.round().clamp(0.0, 100.0) as u8
    }
}

impl Scorer for WeightedScorer {
    fn score(&self, query: &NormalizedFields, candidate: &CatalogEntry) -> Result<u8> {
        Ok(self.breakdown(query, candidate)?.total)
    }
}

// ============================================================================
// Tests
// ============================================================================

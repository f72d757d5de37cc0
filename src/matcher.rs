//! Match orchestration: per-track decision pipeline and whole-playlist runs.
//!
//! For each requested track:
//! 1. exact-path check against the catalog
//! 2. candidate retrieval from the index
//! 3. scoring of every candidate (failures exclude only that candidate)
//! 4. threshold classification into auto / review / unmatched
//!
//! Tracks are independent. The only shared state is the read-only index, the
//! scorer and (optionally) the thread-safe normalization cache, so sequential
//! and parallel runs produce identical results.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cache::NormalizationCache;
use crate::catalog::CatalogSnapshot;
use crate::config::{ExecutionPreference, MatchConfig};
use crate::error::Result;
use crate::index::CandidateIndex;
use crate::models::{
    Decision, Diagnostic, DiagnosticKind, ExecutionMode, MatchMethod, MatchResult, MatchRun,
    MatchingStats, NormalizedFields, RequestedTrack, ScoredCandidate,
};
use crate::normalize::{normalized_fields, NoisePolicy};
use crate::progress::PhaseProgress;
use crate::scoring::{Scorer, WeightedScorer};

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag, checked before each track.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-run knobs that are not part of the matching policy.
#[derive(Default, Clone)]
pub struct RunOptions<'a> {
    pub cache: Option<&'a NormalizationCache>,
    pub cancel: Option<CancelToken>,
    /// Show a progress bar (or log-only progress lines)
    pub progress: bool,
}

// ============================================================================
// Matcher
// ============================================================================

pub struct Matcher {
    index: CandidateIndex,
    config: MatchConfig,
    policy: NoisePolicy,
    scorer: Box<dyn Scorer>,
    build_diagnostics: Vec<Diagnostic>,
}

/// Normalize through the cache when one is supplied.
fn normalize_with(policy: &NoisePolicy, cache: Option<&NormalizationCache>, raw: &str) -> String {
    match cache {
        Some(cache) => cache.get_or_compute(raw, |s| policy.normalize(s)),
        None => policy.normalize(raw),
    }
}

impl Matcher {
    /// Validate the config and build the index without a cache.
    pub fn new(snapshot: CatalogSnapshot, config: &MatchConfig) -> Result<Self> {
        Self::with_cache(snapshot, config, None)
    }

    /// Validate the config and build the index, normalizing catalog fields
    /// through `cache` when given.
    ///
    /// Fails only with `InvalidConfig` or `CatalogUnavailable`; skipped
    /// records end up in [`Matcher::build_diagnostics`].
    pub fn with_cache(
        snapshot: CatalogSnapshot,
        config: &MatchConfig,
        cache: Option<&NormalizationCache>,
    ) -> Result<Self> {
        config.validate()?;
        let policy = config.noise_policy()?;

        let CatalogSnapshot { records, diagnostics } = snapshot;
        let (index, index_diagnostics) = CandidateIndex::build(
            records,
            |raw: &str| normalize_with(&policy, cache, raw),
            config.min_token_len,
            config.full_scan_limit,
        )?;

        let mut build_diagnostics = diagnostics;
        build_diagnostics.extend(index_diagnostics);

        Ok(Self {
            index,
            config: config.clone(),
            policy,
            scorer: Box::new(WeightedScorer::from_config(config)),
            build_diagnostics,
        })
    }

    /// Replace the default weighted scorer.
    pub fn with_scorer(mut self, scorer: Box<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn index(&self) -> &CandidateIndex {
        &self.index
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn policy(&self) -> &NoisePolicy {
        &self.policy
    }

    /// Problems met while loading and indexing the catalog.
    pub fn build_diagnostics(&self) -> &[Diagnostic] {
        &self.build_diagnostics
    }

    /// Normalized form of a requested track, as compared against the index.
    pub fn prepare_query(&self, track: &RequestedTrack, cache: Option<&NormalizationCache>) -> NormalizedFields {
        normalized_fields(
            |raw: &str| normalize_with(&self.policy, cache, raw),
            &track.artist,
            &track.album,
            &track.title,
            None,
            track.isrc.as_deref(),
        )
    }

    /// Run the decision pipeline for one track.
    pub fn match_track(&self, track: &RequestedTrack, cache: Option<&NormalizationCache>) -> MatchResult {
        if track.is_blank() {
            let mut result = MatchResult::unmatched(track.clone());
            result.diagnostics.push(Diagnostic::malformed(
                "requested track has no artist, title, album, ISRC or path",
            ));
            return result;
        }

        // 1. Exact path: trust the playlist's own file reference
        if let Some(entry) = track
            .source_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .and_then(|p| self.index.lookup_path(p))
        {
            debug!("Exact path match for {}: {}", track.display_name(), entry.path());
            return MatchResult {
                requested: track.clone(),
                candidate: Some(entry.clone()),
                score: Some(100),
                method: MatchMethod::ExactPath,
                decision: Decision::Auto,
                retrieval: None,
                top_candidates: vec![ScoredCandidate::from_entry(entry, 100)],
                diagnostics: Vec::new(),
            };
        }

        // 2. Retrieval
        let query = self.prepare_query(track, cache);
        let retrieval = self.index.retrieve(&query);

        // 3. Scoring
        let mut diagnostics = Vec::new();
        let mut scored: Vec<(usize, u8)> = Vec::with_capacity(retrieval.candidates.len());
        for &pos in &retrieval.candidates {
            let entry = self.index.entry(pos);
            match self.scorer.score(&query, entry) {
                Ok(score) => scored.push((pos, score)),
                Err(e) => {
                    warn!("Excluding candidate {} for {}: {}", entry.path(), track.display_name(), e);
                    diagnostics.push(Diagnostic::scoring_failure(e.to_string()));
                }
            }
        }

        let mut result = MatchResult::unmatched(track.clone());
        result.retrieval = Some(retrieval.strategy);
        result.diagnostics = diagnostics;

        // First-seen maximum wins ties
        let mut best: Option<(usize, u8)> = None;
        for &(pos, score) in &scored {
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((pos, score));
            }
        }
        let Some((best_pos, best_score)) = best else {
            debug!("No candidates for {} ({:?})", track.display_name(), retrieval.strategy);
            return result;
        };

        // Stable sort keeps candidate order among equal scores
        let mut ranked = scored;
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(self.config.top_k);

        // 4. Classification
        let decision = Decision::classify(
            Some(best_score),
            self.config.auto_threshold,
            self.config.review_min_threshold,
        );

        result.score = Some(best_score);
        result.decision = decision;
        result.top_candidates = ranked
            .iter()
            .map(|&(pos, score)| ScoredCandidate::from_entry(self.index.entry(pos), score))
            .collect();
        if decision != Decision::Unmatched {
            result.candidate = Some(self.index.entry(best_pos).clone());
            result.method = MatchMethod::Scored;
        }

        debug!(
            "{} -> {:?} (score {}, {:?})",
            track.display_name(),
            decision,
            best_score,
            retrieval.strategy
        );
        result
    }

    /// Execution mode a run over `track_count` tracks would use.
    pub fn execution_mode(&self, track_count: usize) -> ExecutionMode {
        let c = &self.config;
        match c.execution {
            ExecutionPreference::Sequential => ExecutionMode::Sequential,
            ExecutionPreference::Parallel if c.max_workers > 1 => ExecutionMode::Parallel,
            ExecutionPreference::Parallel => ExecutionMode::Sequential,
            ExecutionPreference::Auto => {
                if track_count > c.small_playlist_threshold
                    && self.index.len() >= c.parallel_min_catalog_size
                    && c.max_workers > 1
                {
                    ExecutionMode::Parallel
                } else {
                    ExecutionMode::Sequential
                }
            }
        }
    }

    /// Match a whole playlist.
    ///
    /// Returns one result per processed track, in playlist order. When the
    /// run is cancelled, results for tracks already classified are kept and
    /// `cancelled` is set.
    pub fn run(&self, tracks: &[RequestedTrack], options: RunOptions<'_>) -> MatchRun {
        let start = Instant::now();
        let cancel = options.cancel.clone().unwrap_or_default();
        let cache = options.cache;
        let (cache_hits, cache_misses) = cache.map_or((0, 0), |c| (c.hits(), c.misses()));

        let progress = if options.progress {
            PhaseProgress::new("Matching tracks", tracks.len() as u64)
        } else {
            PhaseProgress::hidden("Matching tracks", tracks.len() as u64)
        };

        let planned = self.execution_mode(tracks.len());
        let mut mode = planned;
        info!(
            "Matching {} tracks against {} catalog entries ({:?})",
            tracks.len(),
            self.index.len(),
            planned
        );

        let process = |track: &RequestedTrack| -> Option<MatchResult> {
            if cancel.is_cancelled() {
                return None;
            }
            let result = self.match_track(track, cache);
            progress.inc();
            Some(result)
        };

        let results: Vec<MatchResult> = match planned {
            ExecutionMode::Parallel => {
                match rayon::ThreadPoolBuilder::new()
                    .num_threads(self.config.max_workers)
                    .build()
                {
                    Ok(pool) => pool.install(|| {
                        tracks
                            .par_iter()
                            .map(process)
                            .collect::<Vec<_>>()
                            .into_iter()
                            .flatten()
                            .collect()
                    }),
                    Err(e) => {
                        warn!("Worker pool unavailable ({}), matching sequentially", e);
                        mode = ExecutionMode::Sequential;
                        tracks.iter().map_while(process).collect()
                    }
                }
            }
            ExecutionMode::Sequential => tracks.iter().map_while(process).collect(),
        };

        let cancelled = results.len() < tracks.len();
        progress.finish(&format!("Matched {}/{} tracks", results.len(), tracks.len()));
        if cancelled {
            warn!("Match run cancelled after {} of {} tracks", results.len(), tracks.len());
        }

        let mut stats = MatchingStats {
            total_tracks: tracks.len(),
            catalog_entries: self.index.len(),
            skipped_catalog_records: self
                .build_diagnostics
                .iter()
                .filter(|d| d.kind == DiagnosticKind::MalformedEntry)
                .count(),
            ..Default::default()
        };
        for result in &results {
            stats.record(result);
        }
        if let Some(c) = cache {
            stats.cache_hits = c.hits() - cache_hits;
            stats.cache_misses = c.misses() - cache_misses;
        }
        stats.elapsed_seconds = start.elapsed().as_secs_f64();

        info!(
            "Matched {} tracks: {} auto, {} review, {} unmatched ({:.1}% auto)",
            stats.processed_tracks,
            stats.auto_matches,
            stats.review_matches,
            stats.unmatched,
            stats.match_rate()
        );

        MatchRun {
            results,
            diagnostics: self.build_diagnostics.clone(),
            stats,
            mode,
            cancelled,
        }
    }
}

/// Build an index over `snapshot` and match every track against it.
///
/// Only `CatalogUnavailable` (and an invalid config) escape; every other
/// problem is reported through diagnostics.
pub fn run_match(
    tracks: &[RequestedTrack],
    snapshot: CatalogSnapshot,
    config: &MatchConfig,
) -> Result<MatchRun> {
    let matcher = Matcher::new(snapshot, config)?;
    Ok(matcher.run(tracks, RunOptions::default()))
}

// ============================================================================
// Tests
// ============================================================================

use playlist_match::config::{ExecutionPreference, MatchConfig};
use playlist_match::models::NormalizedFields;
use playlist_match::normalize::normalize;
use playlist_match::scoring::{Scorer, WeightedScorer};
use playlist_match::{
    run_match, CancelToken, CatalogEntry, CatalogRecord, CatalogSnapshot, Decision, ExecutionMode,
    MatchError, MatchMethod, MatchResult, Matcher, NormalizationCache, RequestedTrack, RunOptions,
};
use std::time::Duration;

fn beatles_catalog() -> CatalogSnapshot {
    CatalogSnapshot::from_records(vec![
        CatalogRecord::new("/music/beatles/hey_jude.flac", "The Beatles", "Past Masters", "Hey Jude")
            .with_isrc("GBAYE0601498"),
        CatalogRecord::new("/music/beatles/let_it_be.flac", "The Beatles", "Let It Be", "Let It Be"),
        CatalogRecord::new("/music/queen/bohemian.flac", "Queen", "A Night at the Opera", "Bohemian Rhapsody"),
        CatalogRecord::new("/music/abba/waterloo.flac", "ABBA", "Waterloo", "Waterloo"),
    ])
}

/// A catalog big enough that runs have real work to share out.
fn large_catalog() -> CatalogSnapshot {
    let mut records = Vec::new();
    for a in 0..20 {
        for t in 0..10 {
            records.push(CatalogRecord::new(
                &format!("/music/artist{:02}/track{:02}.flac", a, t),
                &format!("Artist {} Band", a),
                &format!("Album {}", a),
                &format!("Song Number {} Of {}", t, a),
            ));
        }
    }
    CatalogSnapshot::from_records(records)
}

fn large_playlist() -> Vec<RequestedTrack> {
    (0..60)
        .map(|i| {
            let a = i % 20;
            let t = (i * 7) % 10;
            match i % 4 {
                0 => RequestedTrack::new(&format!("Artist {} Band", a), &format!("Song Number {} Of {}", t, a)),
                1 => RequestedTrack::new(&format!("artist {} band feat. Guest", a), &format!("Song Number {} Of {} (Live)", t, a)),
                2 => RequestedTrack::new("Unknown Performer", &format!("Number {} Of {}", t, a)),
                _ => RequestedTrack::new(&format!("Artist {}", a), "Something Else Entirely"),
            }
        })
        .collect()
}

struct FixedScorer(u8);

impl Scorer for FixedScorer {
    fn score(&self, _query: &NormalizedFields, _candidate: &CatalogEntry) -> playlist_match::Result<u8> {
        Ok(self.0)
    }
}

/// Weighted scoring that cancels the run when it sees `trigger` and is
/// slow on every other track, so the rest of the playlist is still queued.
struct CancelOnTitle {
    trigger: &'static str,
    cancel: CancelToken,
    inner: WeightedScorer,
}

impl Scorer for CancelOnTitle {
    fn score(&self, query: &NormalizedFields, candidate: &CatalogEntry) -> playlist_match::Result<u8> {
        if query.title == self.trigger {
            self.cancel.cancel();
        } else {
            std::thread::sleep(Duration::from_millis(1));
        }
        self.inner.score(query, candidate)
    }
}

fn parallel_config() -> MatchConfig {
    MatchConfig {
        execution: ExecutionPreference::Parallel,
        max_workers: 4,
        ..Default::default()
    }
}

/// Playlist positions of `results`, which must appear in playlist order.
fn positions_in(tracks: &[RequestedTrack], results: &[MatchResult]) -> Vec<usize> {
    let mut positions = Vec::with_capacity(results.len());
    let mut next = 0;
    for result in results {
        let offset = tracks[next..]
            .iter()
            .position(|t| *t == result.requested)
            .expect("result out of playlist order");
        positions.push(next + offset);
        next += offset + 1;
    }
    positions
}

fn fingerprint(run: &playlist_match::MatchRun) -> Vec<(Option<String>, Option<u8>, Decision)> {
    run.results
        .iter()
        .map(|r| (r.candidate_path().map(str::to_string), r.score, r.decision))
        .collect()
}

#[test]
fn hey_jude_is_auto_matched() {
    let tracks = vec![RequestedTrack::new("The Beatles", "Hey Jude")];
    let run = run_match(&tracks, beatles_catalog(), &MatchConfig::default()).unwrap();

    let result = &run.results[0];
    assert_eq!(result.decision, Decision::Auto);
    assert!(result.score.unwrap() >= 90);
    assert_eq!(result.candidate_path(), Some("/music/beatles/hey_jude.flac"));
}

#[test]
fn remaster_qualifier_still_clears_auto_threshold() {
    let tracks = vec![RequestedTrack::new("The Beatles", "Hey Jude (Remastered 2015)")];
    let run = run_match(&tracks, beatles_catalog(), &MatchConfig::default()).unwrap();

    let result = &run.results[0];
    assert_eq!(result.decision, Decision::Auto);
    assert!(result.score.unwrap() >= MatchConfig::default().auto_threshold);
    assert_eq!(result.candidate_path(), Some("/music/beatles/hey_jude.flac"));
}

#[test]
fn unrelated_track_is_unmatched() {
    let tracks = vec![RequestedTrack::new("Radiohead", "Paranoid Android")];
    let run = run_match(&tracks, beatles_catalog(), &MatchConfig::default()).unwrap();

    let result = &run.results[0];
    assert_eq!(result.decision, Decision::Unmatched);
    assert!(result.candidate.is_none());
    assert_eq!(run.stats.unmatched, 1);
}

#[test]
fn exact_path_short_circuits_scoring() {
    let track = RequestedTrack::new("Some Cover Band", "Totally Different Name")
        .with_source_path("/music/abba/waterloo.flac");
    let run = run_match(&[track], beatles_catalog(), &MatchConfig::default()).unwrap();

    let result = &run.results[0];
    assert_eq!(result.method, MatchMethod::ExactPath);
    assert_eq!(result.score, Some(100));
    assert_eq!(result.decision, Decision::Auto);
    assert_eq!(result.candidate_path(), Some("/music/abba/waterloo.flac"));
}

#[test]
fn isrc_short_circuits_dissimilar_tags() {
    let track = RequestedTrack::new("Los Escarabajos", "Oye Judas").with_isrc("gbaye0601498");
    let run = run_match(&[track], beatles_catalog(), &MatchConfig::default()).unwrap();

    let result = &run.results[0];
    assert_eq!(result.score, Some(100));
    assert_eq!(result.candidate_path(), Some("/music/beatles/hey_jude.flac"));
    assert_eq!(run.stats.isrc_matches, 1);
}

#[test]
fn threshold_boundary() {
    let track = RequestedTrack::new("The Beatles", "Hey Jude");
    let config = MatchConfig::default();

    let at = Matcher::new(beatles_catalog(), &config).unwrap().with_scorer(Box::new(FixedScorer(90)));
    assert_eq!(at.match_track(&track, None).decision, Decision::Auto);

    let below = Matcher::new(beatles_catalog(), &config).unwrap().with_scorer(Box::new(FixedScorer(89)));
    assert_eq!(below.match_track(&track, None).decision, Decision::Review);

    let strict = MatchConfig {
        review_min_threshold: 90,
        ..Default::default()
    };
    let below = Matcher::new(beatles_catalog(), &strict).unwrap().with_scorer(Box::new(FixedScorer(89)));
    let result = below.match_track(&track, None);
    assert_eq!(result.decision, Decision::Unmatched);
    assert_eq!(result.score, Some(89));
}

#[test]
fn no_bucket_means_no_score() {
    let config = MatchConfig {
        full_scan_limit: 0,
        ..Default::default()
    };
    let tracks = vec![RequestedTrack::new("Nobody", "Nothing")];
    let run = run_match(&tracks, beatles_catalog(), &config).unwrap();

    let result = &run.results[0];
    assert_eq!(result.decision, Decision::Unmatched);
    assert_eq!(result.score, None);
    assert!(result.candidate.is_none());
}

#[test]
fn empty_catalog_is_fatal() {
    let tracks = vec![RequestedTrack::new("The Beatles", "Hey Jude")];
    let result = run_match(&tracks, CatalogSnapshot::default(), &MatchConfig::default());
    assert!(matches!(result, Err(MatchError::CatalogUnavailable(_))));
}

#[test]
fn sequential_and_parallel_runs_agree() {
    let tracks = large_playlist();

    let sequential = MatchConfig {
        execution: ExecutionPreference::Sequential,
        ..Default::default()
    };
    let parallel = MatchConfig {
        execution: ExecutionPreference::Parallel,
        max_workers: 4,
        ..Default::default()
    };

    let a = run_match(&tracks, large_catalog(), &sequential).unwrap();
    let b = run_match(&tracks, large_catalog(), &parallel).unwrap();
    let c = run_match(&tracks, large_catalog(), &parallel).unwrap();

    assert_eq!(a.mode, ExecutionMode::Sequential);
    assert_eq!(b.mode, ExecutionMode::Parallel);
    assert_eq!(a.results.len(), tracks.len());
    assert_eq!(fingerprint(&a), fingerprint(&b));
    assert_eq!(fingerprint(&b), fingerprint(&c));
    assert_eq!(a.results, b.results);
}

#[test]
fn cache_does_not_change_results() {
    let tracks = large_playlist();
    let config = MatchConfig::default();
    let cold = run_match(&tracks, large_catalog(), &config).unwrap();

    let cache = NormalizationCache::from_config(&config).unwrap();
    let matcher = Matcher::with_cache(large_catalog(), &config, Some(&cache)).unwrap();
    let options = || RunOptions {
        cache: Some(&cache),
        ..Default::default()
    };
    let first = matcher.run(&tracks, options());
    let warm = matcher.run(&tracks, options());

    assert_eq!(fingerprint(&cold), fingerprint(&first));
    assert_eq!(fingerprint(&cold), fingerprint(&warm));
    assert!(warm.stats.cache_hits > 0);
    assert_eq!(warm.stats.cache_misses, 0);
}

#[test]
fn normalization_is_idempotent() {
    for s in [
        "",
        "!!! ... ???",
        "Beyoncé",
        "Sigur Rós - Hoppípolla",
        "Hey Jude (Remastered 2015)",
        "Don't Stop Me Now - Live at Wembley '86",
        "Song (feat. Someone) [Deluxe Edition]",
        "Mötley Crüe & Friends",
        "Кино",
    ] {
        let once = normalize(s);
        assert_eq!(normalize(&once), once, "not idempotent for {:?}", s);
    }
}

#[test]
fn parallel_run_with_shared_cache_matches_cold_sequential_run() {
    let tracks = large_playlist();
    let sequential = MatchConfig {
        execution: ExecutionPreference::Sequential,
        ..Default::default()
    };
    let cold = run_match(&tracks, large_catalog(), &sequential).unwrap();

    let config = parallel_config();
    let cache = NormalizationCache::from_config(&config).unwrap();
    let matcher = Matcher::with_cache(large_catalog(), &config, Some(&cache)).unwrap();

    for _ in 0..3 {
        let run = matcher.run(
            &tracks,
            RunOptions {
                cache: Some(&cache),
                ..Default::default()
            },
        );
        assert_eq!(run.mode, ExecutionMode::Parallel);
        assert!(!run.cancelled);
        assert_eq!(run.results, cold.results);
    }
    assert!(cache.hits() > 0);
}

#[test]
fn parallel_cancellation_keeps_finished_tracks_in_order() {
    let trigger = RequestedTrack::new("Artist 0 Band", "Song Number 0 Of 0");
    let mut tracks = vec![trigger];
    tracks.extend(large_playlist());
    tracks.extend(large_playlist());

    let config = parallel_config();
    let reference = Matcher::new(large_catalog(), &config)
        .unwrap()
        .run(&tracks, RunOptions::default());
    assert!(!reference.cancelled);

    let cancel = CancelToken::new();
    let matcher = Matcher::new(large_catalog(), &config).unwrap().with_scorer(Box::new(CancelOnTitle {
        trigger: "song number 0 of 0",
        cancel: cancel.clone(),
        inner: WeightedScorer::from_config(&config),
    }));
    let run = matcher.run(
        &tracks,
        RunOptions {
            cancel: Some(cancel),
            ..Default::default()
        },
    );

    assert_eq!(run.mode, ExecutionMode::Parallel);
    assert!(run.cancelled);
    assert!(!run.results.is_empty());
    assert!(run.results.len() < tracks.len());
    assert_eq!(run.stats.processed_tracks, run.results.len());

    let positions = positions_in(&tracks, &run.results);
    assert_eq!(positions[0], 0, "the track that cancelled the run still finished");
    for (pos, result) in positions.iter().zip(&run.results) {
        assert_eq!(result, &reference.results[*pos]);
    }
}

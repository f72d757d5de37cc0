use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Instant;

use playlist_match::config::ExecutionPreference;
use playlist_match::export::{self, DEFAULT_SONGSHIFT_NAME, DEFAULT_SONGSHIFT_SERVICE};
use playlist_match::playlist::read_playlist;
use playlist_match::progress::{create_spinner, format_duration, set_log_only};
use playlist_match::safety::validate_output_path;
use playlist_match::{CatalogSource, MatchConfig, Matcher, NormalizationCache, RunOptions, SqliteCatalog};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Auto,
    Sequential,
    Parallel,
}

impl From<Mode> for ExecutionPreference {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Auto => ExecutionPreference::Auto,
            Mode::Sequential => ExecutionPreference::Sequential,
            Mode::Parallel => ExecutionPreference::Parallel,
        }
    }
}

#[derive(Parser)]
#[command(name = "playlist-match")]
#[command(about = "Match playlist tracks against a local audio catalog")]
struct Args {
    /// Catalog database (scanner's `flacs` table)
    catalog: PathBuf,

    /// Playlist file (.json, .m3u, .m3u8, .txt)
    playlist: PathBuf,

    /// Write every result as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Write auto-accepted matches as M3U
    #[arg(long)]
    m3u: Option<PathBuf>,

    /// Write unmatched tracks as a SongShift import
    #[arg(long)]
    songshift: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_SONGSHIFT_NAME)]
    songshift_name: String,

    /// JSON config file; CLI flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Normalization cache file (default: next to the catalog)
    #[arg(long, conflicts_with = "no_cache")]
    cache: Option<PathBuf>,

    #[arg(long)]
    no_cache: bool,

    #[arg(long)]
    auto_threshold: Option<u8>,

    #[arg(long)]
    review_min: Option<u8>,

    #[arg(long)]
    top_k: Option<usize>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Write run statistics as JSON
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Disable progress bars, emit periodic progress lines instead
    #[arg(long)]
    log_only: bool,
}

fn build_config(args: &Args) -> Result<MatchConfig> {
    let mut config = match &args.config {
        Some(path) => MatchConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => MatchConfig::default(),
    };
    if let Some(v) = args.auto_threshold {
        config.auto_threshold = v;
    }
    if let Some(v) = args.review_min {
        config.review_min_threshold = v;
    }
    if let Some(v) = args.top_k {
        config.top_k = v;
    }
    if let Some(v) = args.workers {
        config.max_workers = v;
    }
    if let Some(mode) = args.mode {
        config.execution = mode.into();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let start = Instant::now();
    let config = build_config(&args)?;

    let cache_path = if args.no_cache {
        None
    } else {
        Some(
            args.cache
                .clone()
                .unwrap_or_else(|| args.catalog.with_extension("normcache.sqlite3")),
        )
    };

    // Refuse to clobber any input before doing any work
    let mut protected: Vec<&Path> = vec![args.catalog.as_path(), args.playlist.as_path()];
    if let Some(path) = &cache_path {
        protected.push(path);
    }
    if let Some(path) = &args.json {
        validate_output_path(path, &["json"], &protected)?;
    }
    if let Some(path) = &args.m3u {
        validate_output_path(path, &["m3u", "m3u8"], &protected)?;
    }
    if let Some(path) = &args.songshift {
        validate_output_path(path, &["json"], &protected)?;
    }
    if let Some(path) = &args.stats {
        validate_output_path(path, &["json"], &protected)?;
    }

    println!("Reading playlist: {:?}", args.playlist);
    let tracks = read_playlist(&args.playlist)
        .with_context(|| format!("Failed to read playlist {:?}", args.playlist))?;

    let policy = config.noise_policy()?;
    let (cache, cache_diagnostics) = match &cache_path {
        Some(path) => {
            let (cache, diagnostics) = NormalizationCache::load_sqlite(
                path,
                config.cache_ttl_seconds,
                config.cache_max_entries,
                policy.fingerprint(),
            );
            (Some(cache), diagnostics)
        }
        None => (None, Vec::new()),
    };

    println!("Opening catalog: {:?}", args.catalog);
    let spinner = create_spinner("Loading catalog and building index");
    let snapshot = SqliteCatalog::new(&args.catalog)
        .load_all()
        .context("Failed to load catalog")?;
    let matcher = Matcher::with_cache(snapshot, &config, cache.as_ref()).context("Failed to build index")?;
    spinner.finish_with_message(format!("Indexed {} catalog entries", matcher.index().len()));

    let mut run = matcher.run(
        &tracks,
        RunOptions {
            cache: cache.as_ref(),
            cancel: None,
            progress: true,
        },
    );
    run.diagnostics.extend(cache_diagnostics);
    run.stats.log_phase("MATCH");

    if let Some(path) = &args.json {
        export::write_json(&run, path).with_context(|| format!("Failed to write {:?}", path))?;
    }
    if let Some(path) = &args.m3u {
        export::write_m3u(&run.results, path).with_context(|| format!("Failed to write {:?}", path))?;
    }
    if let Some(path) = &args.songshift {
        export::write_songshift(&run.results, path, &args.songshift_name, DEFAULT_SONGSHIFT_SERVICE)
            .with_context(|| format!("Failed to write {:?}", path))?;
    }

    if let (Some(cache), Some(path)) = (&cache, &cache_path) {
        // A lost cache only costs time on the next run
        if let Err(e) = cache.save_sqlite(path) {
            tracing::warn!("Failed to save normalization cache {:?}: {}", path, e);
        }
    }

    if let Some(path) = &args.stats {
        run.stats
            .write_to_file(path)
            .with_context(|| format!("Failed to write stats {:?}", path))?;
    }

    let stats = &run.stats;
    println!("\n{:=<60}", "");
    println!("Matching complete!");
    println!("  Tracks: {} ({} processed)", stats.total_tracks, stats.processed_tracks);
    println!("  Auto: {} ({:.1}%)", stats.auto_matches, stats.match_rate());
    println!("  Review: {}", stats.review_matches);
    println!("  Unmatched: {}", stats.unmatched);
    println!("  Mode: {:?}", run.mode);
    if !run.diagnostics.is_empty() {
        println!("  Diagnostics: {}", run.diagnostics.len());
    }
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    for result in run.needs_review() {
        if let Some(candidate) = &result.candidate {
            println!(
                "  [review {:>3}] {} -> {}",
                result.score.unwrap_or(0),
                result.requested.display_name(),
                candidate.path()
            );
        }
    }

    Ok(())
}

//! Show how one track would be matched: normalized query, retrieval strategy
//! and per-measure scores of the best candidates.
//!
//! Usage: explain-match <catalog.db> --title "Hey Jude" [--artist "The Beatles"]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use playlist_match::config::MatchConfig;
use playlist_match::scoring::WeightedScorer;
use playlist_match::{CatalogSource, Matcher, RequestedTrack, SqliteCatalog};

#[derive(Parser)]
#[command(name = "explain-match")]
#[command(about = "Explain the match decision for a single track")]
struct Args {
    catalog: PathBuf,

    #[arg(long)]
    title: String,

    #[arg(long, default_value = "")]
    artist: String,

    #[arg(long, default_value = "")]
    album: String,

    #[arg(long)]
    isrc: Option<String>,

    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => MatchConfig::from_json_file(path)?,
        None => MatchConfig::default(),
    };

    let snapshot = SqliteCatalog::new(&args.catalog)
        .load_all()
        .context("Failed to load catalog")?;
    let matcher = Matcher::new(snapshot, &config)?;

    let mut track = RequestedTrack::new(&args.artist, &args.title).with_album(&args.album);
    if let Some(isrc) = &args.isrc {
        track = track.with_isrc(isrc);
    }

    let query = matcher.prepare_query(&track, None);
    println!("Query: {}", track.display_name());
    println!("  artist:  {:?} (key {:?})", query.artist, query.artist_key);
    if let Some(primary) = &query.primary_artist_key {
        println!("  primary: {:?}", primary);
    }
    println!("  title:   {:?}", query.title);
    println!("  search:  {:?}", query.search_string);
    if let Some(isrc) = &query.isrc {
        println!("  isrc:    {}", isrc);
    }

    let retrieval = matcher.index().retrieve(&query);
    println!(
        "\nRetrieval: {:?} ({} candidates, {} by ISRC)",
        retrieval.strategy,
        retrieval.candidates.len(),
        retrieval.isrc_hits
    );

    let scorer = WeightedScorer::from_config(&config);
    let mut rows = Vec::with_capacity(retrieval.candidates.len());
    for &pos in &retrieval.candidates {
        let entry = matcher.index().entry(pos);
        match scorer.breakdown(&query, entry) {
            Ok(b) => rows.push((entry, b)),
            Err(e) => println!("  ! {}: {}", entry.path(), e),
        }
    }
    rows.sort_by(|a, b| b.1.total.cmp(&a.1.total));
    rows.truncate(config.top_k);

    println!("\n{:-<80}", "");
    println!("{:>5} {:>6} {:>6} {:>6}  {}", "total", "title", "artist", "full", "candidate");
    println!("{:-<80}", "");
    for (entry, b) in &rows {
        println!(
            "{:>5} {:>6.1} {:>6.1} {:>6.1}  {} - {}{}",
            b.total,
            b.title,
            b.artist,
            b.full,
            entry.artist(),
            entry.title(),
            if b.isrc_match { " [isrc]" } else { "" }
        );
        println!("{:>27}{}", "", entry.path());
    }

    let result = matcher.match_track(&track, None);
    println!("{:-<80}", "");
    println!(
        "Decision: {:?} (score {}, method {:?})",
        result.decision,
        result.score.map_or("-".to_string(), |s| s.to_string()),
        result.method
    );

    Ok(())
}

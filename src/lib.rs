//! Playlist matching library: maps loosely described playlist tracks onto a
//! local audio catalog.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod export;
pub mod index;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod playlist;
pub mod progress;
pub mod safety;
pub mod scoring;

pub use cache::NormalizationCache;
pub use catalog::{CatalogSnapshot, CatalogSource, SqliteCatalog};
pub use config::{ExecutionPreference, MatchConfig};
pub use error::{MatchError, Result};
pub use matcher::{run_match, CancelToken, Matcher, RunOptions};
pub use models::{
    CatalogEntry, CatalogRecord, Decision, Diagnostic, DiagnosticKind, ExecutionMode, MatchMethod,
    MatchResult, MatchRun, MatchingStats, RequestedTrack, RetrievalStrategy, ScoredCandidate,
};

//! Immutable match configuration.
//!
//! A `MatchConfig` is built once (defaults, JSON file, CLI overrides) and
//! handed to the matcher by reference. Nothing in the core reads the
//! environment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MatchError, Result};
use crate::normalize::{NoisePolicy, DEFAULT_CREDIT_MARKERS, DEFAULT_NOISE_PHRASES};

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_AUTO_THRESHOLD: u8 = 90;
pub const DEFAULT_REVIEW_MIN_THRESHOLD: u8 = 75;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MAX_WORKERS: usize = 8;
pub const DEFAULT_SMALL_PLAYLIST_THRESHOLD: usize = 50;
/// Below this many catalog entries per-track scoring is too cheap to be worth a pool
pub const DEFAULT_PARALLEL_MIN_CATALOG_SIZE: usize = 1000;
/// Largest catalog that may be scanned in full when targeted lookups fail
pub const DEFAULT_FULL_SCAN_LIMIT: usize = 5000;
pub const DEFAULT_MIN_TOKEN_LEN: usize = 2;
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 200_000;
/// Tags longer than this are treated as corrupt by the weighted scorer
pub const DEFAULT_MAX_FIELD_LEN: usize = 1024;

/// How the caller wants tracks scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPreference {
    /// Decide from playlist and catalog size
    #[default]
    Auto,
    Sequential,
    Parallel,
}

/// Relative weights of the three field-level similarity measures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldWeights {
    pub title: f64,
    pub artist: f64,
    pub full: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            title: 0.40,
            artist: 0.35,
            full: 0.25,
        }
    }
}

impl FieldWeights {
    pub fn total(&self) -> f64 {
        self.title + self.artist + self.full
    }
}

// ============================================================================
// MatchConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub auto_threshold: u8,
    pub review_min_threshold: u8,
    pub top_k: usize,
    pub max_workers: usize,
    pub small_playlist_threshold: usize,
    pub parallel_min_catalog_size: usize,
    pub full_scan_limit: usize,
    pub min_token_len: usize,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: usize,
    pub execution: ExecutionPreference,
    pub noise_phrases: Vec<String>,
    pub credit_markers: Vec<String>,
    pub weights: FieldWeights,
    pub max_field_len: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            auto_threshold: DEFAULT_AUTO_THRESHOLD,
            review_min_threshold: DEFAULT_REVIEW_MIN_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            max_workers: DEFAULT_MAX_WORKERS,
            small_playlist_threshold: DEFAULT_SMALL_PLAYLIST_THRESHOLD,
            parallel_min_catalog_size: DEFAULT_PARALLEL_MIN_CATALOG_SIZE,
            full_scan_limit: DEFAULT_FULL_SCAN_LIMIT,
            min_token_len: DEFAULT_MIN_TOKEN_LEN,
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            execution: ExecutionPreference::Auto,
            noise_phrases: DEFAULT_NOISE_PHRASES.iter().map(|s| s.to_string()).collect(),
            credit_markers: DEFAULT_CREDIT_MARKERS.iter().map(|s| s.to_string()).collect(),
            weights: FieldWeights::default(),
            max_field_len: DEFAULT_MAX_FIELD_LEN,
        }
    }
}

impl MatchConfig {
    /// Load a config file. Keys missing from the file keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: MatchConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the matcher cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.auto_threshold > 100 || self.review_min_threshold > 100 {
            return Err(MatchError::InvalidConfig(format!(
                "thresholds must be within 0..=100 (auto={}, review_min={})",
                self.auto_threshold, self.review_min_threshold
            )));
        }
        if self.review_min_threshold > self.auto_threshold {
            return Err(MatchError::InvalidConfig(format!(
                "review_min_threshold ({}) exceeds auto_threshold ({})",
                self.review_min_threshold, self.auto_threshold
            )));
        }
        if self.top_k == 0 {
            return Err(MatchError::InvalidConfig("top_k must be at least 1".into()));
        }
        if self.max_workers == 0 {
            return Err(MatchError::InvalidConfig("max_workers must be at least 1".into()));
        }
        if self.min_token_len == 0 {
            return Err(MatchError::InvalidConfig("min_token_len must be at least 1".into()));
        }
        let w = &self.weights;
        if [w.title, w.artist, w.full].iter().any(|v| !v.is_finite() || *v < 0.0) || w.total() <= 0.0 {
            return Err(MatchError::InvalidConfig(format!(
                "weights must be non-negative and not all zero (title={}, artist={}, full={})",
                w.title, w.artist, w.full
            )));
        }
        self.noise_policy()?;
        Ok(())
    }

    /// Compile the configured noise phrases and credit markers.
    pub fn noise_policy(&self) -> Result<NoisePolicy> {
        NoisePolicy::new(self.noise_phrases.as_slice(), self.credit_markers.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = MatchConfig::default();
        assert_eq!(config.auto_threshold, 90);
        assert_eq!(config.review_min_threshold, 75);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.small_playlist_threshold, 50);
        assert_eq!(config.cache_ttl_seconds, 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let config = MatchConfig {
            auto_threshold: 70,
            review_min_threshold: 80,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(MatchError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_weights_and_workers() {
        let config = MatchConfig {
            weights: FieldWeights { title: 0.0, artist: 0.0, full: 0.0 },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MatchConfig {
            max_workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"auto_threshold": 95, "execution": "sequential"}}"#).unwrap();

        let config = MatchConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.auto_threshold, 95);
        assert_eq!(config.review_min_threshold, 75);
        assert_eq!(config.execution, ExecutionPreference::Sequential);
        assert_eq!(config.weights, FieldWeights::default());
    }
}

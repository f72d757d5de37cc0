//! Normalization cache: raw string → normalized string with a creation time.
//!
//! Thread-safe (one `RwLock` around the map), so parallel workers share a
//! single instance by reference. Entries older than the TTL are treated as
//! absent. The cache can be persisted to a SQLite file between runs; a file
//! that cannot be read back is discarded, never fatal.

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OpenFlags};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::config::MatchConfig;
use crate::error::{MatchError, Result};
use crate::models::Diagnostic;

const WRITE_BATCH_SIZE: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedValue {
    normalized: String,
    /// Seconds since the Unix epoch
    created_at: u64,
}

pub struct NormalizationCache {
    entries: RwLock<FxHashMap<String, CachedValue>>,
    ttl_seconds: u64,
    max_entries: usize,
    /// Noise-policy fingerprint the cached values were computed under
    fingerprint: String,
    hits: AtomicUsize,
    misses: AtomicUsize,
    /// Earliest expiry among the entries kept by the last purge. A full
    /// cache is not purged again before then.
    next_purge_at: AtomicU64,
    purge_runs: AtomicUsize,
}

/// Current wall-clock time in whole seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl NormalizationCache {
    pub fn new(ttl_seconds: u64, max_entries: usize, fingerprint: &str) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            ttl_seconds,
            max_entries,
            fingerprint: fingerprint.to_string(),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            next_purge_at: AtomicU64::new(0),
            purge_runs: AtomicUsize::new(0),
        }
    }

    /// Empty cache sized from the config, tied to its noise policy.
    pub fn from_config(config: &MatchConfig) -> Result<Self> {
        let policy = config.noise_policy()?;
        Ok(Self::new(config.cache_ttl_seconds, config.cache_max_entries, policy.fingerprint()))
    }

    fn is_fresh(&self, value: &CachedValue, now: u64) -> bool {
        now.saturating_sub(value.created_at) < self.ttl_seconds
    }

    /// Cached value for `raw`, if present and not expired.
    pub fn get_at(&self, raw: &str, now: u64) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(raw)
            .filter(|v| self.is_fresh(v, now))
            .map(|v| v.normalized.clone())
    }

    pub fn get_or_compute<F: FnOnce(&str) -> String>(&self, raw: &str, compute: F) -> String {
        self.get_or_compute_at(raw, now_secs(), compute)
    }

    /// Lookup with an explicit clock; recomputes and stores on a miss.
    pub fn get_or_compute_at<F: FnOnce(&str) -> String>(&self, raw: &str, now: u64, compute: F) -> String {
        if let Some(hit) = self.get_at(raw, now) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let normalized = compute(raw);
        self.insert_at(raw, &normalized, now);
        normalized
    }

    fn insert_at(&self, raw: &str, normalized: &str, now: u64) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.max_entries && !entries.contains_key(raw) {
            if now < self.next_purge_at.load(Ordering::Relaxed) {
                return;
            }
            self.purge_locked(&mut entries, now);
            if entries.len() >= self.max_entries {
                return;
            }
        }
        entries.insert(
            raw.to_string(),
            CachedValue {
                normalized: normalized.to_string(),
                created_at: now,
            },
        );
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self, now: u64) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        self.purge_locked(&mut entries, now)
    }

    fn purge_locked(&self, entries: &mut FxHashMap<String, CachedValue>, now: u64) -> usize {
        let before = entries.len();
        let ttl = self.ttl_seconds;
        entries.retain(|_, v| now.saturating_sub(v.created_at) < ttl);

        let next = entries
            .values()
            .map(|v| v.created_at.saturating_add(ttl))
            .min()
            .unwrap_or(0);
        self.next_purge_at.store(next, Ordering::Relaxed);
        let runs = self.purge_runs.fetch_add(1, Ordering::Relaxed) + 1;

        let removed = before - entries.len();
        debug!(
            "Cache purge #{} removed {} expired entries, next expiry at {}",
            runs, removed, next
        );
        removed
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.next_purge_at.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    // ========================================================================
    // SQLite persistence
    // ========================================================================

    /// Load a persisted cache.
    ///
    /// A missing file yields an empty cache. An unreadable or inconsistent
    /// file yields an empty cache plus a `CacheCorruption` diagnostic. Entries
    /// computed under a different noise policy are discarded.
    pub fn load_sqlite(
        path: &Path,
        ttl_seconds: u64,
        max_entries: usize,
        fingerprint: &str,
    ) -> (Self, Vec<Diagnostic>) {
        let cache = Self::new(ttl_seconds, max_entries, fingerprint);
        if !path.exists() {
            debug!("No normalization cache at {:?}, starting cold", path);
            return (cache, Vec::new());
        }

        match cache.read_sqlite(path, now_secs()) {
            Ok(loaded) => {
                info!("Loaded {} cached normalizations from {:?}", loaded, path);
                (cache, Vec::new())
            }
            Err(e) => {
                cache.clear();
                let message = format!("discarding normalization cache {:?}: {}", path, e);
                warn!("{}", message);
                (cache, vec![Diagnostic::cache_corruption(message)])
            }
        }
    }

    fn read_sqlite(&self, path: &Path, now: u64) -> Result<usize> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

        let stored: Option<String> = conn
            .query_row("SELECT value FROM cache_meta WHERE key = 'fingerprint'", [], |row| row.get(0))
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if stored.as_deref() != Some(self.fingerprint.as_str()) {
            info!("Normalization cache built under a different noise policy, ignoring it");
            return Ok(0);
        }

        let mut stmt = conn.prepare("SELECT raw, normalized, created_at FROM normalization_cache")?;
        let mut rows = stmt.query([])?;
        let mut loaded = FxHashMap::default();

        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            let normalized: String = row.get(1)?;
            let created_at: i64 = row.get(2)?;
            if created_at < 0 || created_at as u64 > now {
                return Err(MatchError::CacheCorruption(format!(
                    "entry {:?} has creation time {} outside 0..={}",
                    raw, created_at, now
                )));
            }
            let value = CachedValue {
                normalized,
                created_at: created_at as u64,
            };
            if self.is_fresh(&value, now) && loaded.len() < self.max_entries {
                loaded.insert(raw, value);
            }
        }

        let count = loaded.len();
        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = loaded;
        self.next_purge_at.store(0, Ordering::Relaxed);
        Ok(count)
    }

    /// Persist all unexpired entries, replacing the file's previous content.
    /// A file that cannot be opened as a cache database is recreated.
    pub fn save_sqlite(&self, path: &Path) -> Result<usize> {
        match self.write_sqlite(path) {
            Ok(n) => Ok(n),
            Err(e) if path.exists() => {
                warn!("Recreating normalization cache {:?} after write failure: {}", path, e);
                std::fs::remove_file(path)?;
                self.write_sqlite(path)
            }
            Err(e) => Err(e),
        }
    }

    fn write_sqlite(&self, path: &Path) -> Result<usize> {
        let mut conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS normalization_cache (
                raw TEXT PRIMARY KEY,
                normalized TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cache_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        let now = now_secs();
        let snapshot: Vec<(String, CachedValue)> = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries
                .iter()
                .filter(|(_, v)| self.is_fresh(v, now))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM normalization_cache", [])?;
        tx.execute(
            "INSERT OR REPLACE INTO cache_meta (key, value) VALUES ('fingerprint', ?1)",
            params![self.fingerprint],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO normalization_cache (raw, normalized, created_at) VALUES (?1, ?2, ?3)",
            )?;
            for chunk in snapshot.chunks(WRITE_BATCH_SIZE) {
                for (raw, value) in chunk {
                    stmt.execute(params![raw, value.normalized, value.created_at as i64])?;
                }
            }
        }
        tx.commit()?;

        debug!("Saved {} cached normalizations to {:?}", snapshot.len(), path);
        Ok(snapshot.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiagnosticKind;

    fn upper(s: &str) -> String {
        s.to_uppercase()
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = NormalizationCache::new(3600, 100, "fp");
        assert_eq!(cache.get_or_compute_at("abc", 1000, upper), "ABC");
        assert_eq!(cache.get_or_compute_at("abc", 1001, |_| panic!("should hit")), "ABC");
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_expired_entry_is_recomputed() {
        let cache = NormalizationCache::new(3600, 100, "fp");
        cache.get_or_compute_at("abc", 1000, |_| "old".to_string());
        assert_eq!(cache.get_at("abc", 1000 + 3599).as_deref(), Some("old"));
        assert_eq!(cache.get_at("abc", 1000 + 3600), None);
        assert_eq!(cache.get_or_compute_at("abc", 1000 + 3600, upper), "ABC");
        assert_eq!(cache.purge_expired(1000 + 3600), 0);
        assert_eq!(cache.purge_expired(1000 + 7200), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_bounded_size() {
        let cache = NormalizationCache::new(3600, 2, "fp");
        cache.get_or_compute_at("a", 0, upper);
        cache.get_or_compute_at("b", 0, upper);
        assert_eq!(cache.get_or_compute_at("c", 0, upper), "C");
        assert_eq!(cache.len(), 2);
        // Expired entries make room
        cache.get_or_compute_at("d", 4000, upper);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_full_cache_purges_once_per_expiry() {
        let cache = NormalizationCache::new(100, 2, "fp");
        cache.get_or_compute_at("a", 0, upper);
        cache.get_or_compute_at("b", 10, upper);

        for i in 0..1000u64 {
            let raw = format!("miss{}", i);
            assert_eq!(cache.get_or_compute_at(&raw, 20 + i % 50, upper), raw.to_uppercase());
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_runs.load(Ordering::Relaxed), 1);

        // "a" expires at 100, so the next miss purges again and is stored
        cache.get_or_compute_at("late", 100, upper);
        assert_eq!(cache.purge_runs.load(Ordering::Relaxed), 2);
        assert_eq!(cache.get_at("late", 100).as_deref(), Some("LATE"));
        assert_eq!(cache.get_at("a", 100), None);
        assert_eq!(cache.get_at("b", 100).as_deref(), Some("B"));
    }

    #[test]
    fn test_sqlite_round_trip_and_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let cache = NormalizationCache::new(3600, 100, "fp");
        cache.get_or_compute("Hey Jude", |s| s.to_lowercase());
        assert_eq!(cache.save_sqlite(&path).unwrap(), 1);

        let (loaded, diagnostics) = NormalizationCache::load_sqlite(&path, 3600, 100, "fp");
        assert!(diagnostics.is_empty());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get_or_compute("Hey Jude", |_| panic!("should hit")), "hey jude");

        let (other, diagnostics) = NormalizationCache::load_sqlite(&path, 3600, 100, "other");
        assert!(diagnostics.is_empty());
        assert!(other.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        std::fs::write(&path, b"definitely not a sqlite database, just some bytes").unwrap();

        let (cache, diagnostics) = NormalizationCache::load_sqlite(&path, 3600, 100, "fp");
        assert!(cache.is_empty());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::CacheCorruption);

        // Saving over it recreates a valid file
        cache.get_or_compute("x", upper);
        assert_eq!(cache.save_sqlite(&path).unwrap(), 1);
        let (reloaded, diagnostics) = NormalizationCache::load_sqlite(&path, 3600, 100, "fp");
        assert!(diagnostics.is_empty());
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_future_timestamps_are_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        NormalizationCache::new(3600, 100, "fp").save_sqlite(&path).unwrap();

        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "INSERT INTO normalization_cache (raw, normalized, created_at) VALUES ('a', 'a', ?1)",
            params![(now_secs() + 86_400) as i64],
        )
        .unwrap();
        drop(conn);

        let (cache, diagnostics) = NormalizationCache::load_sqlite(&path, 3600, 100, "fp");
        assert!(cache.is_empty());
        assert_eq!(diagnostics[0].kind, DiagnosticKind::CacheCorruption);
    }
}

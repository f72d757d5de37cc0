//! Catalog source: the single bulk read that feeds the candidate index.
//!
//! The catalog database is maintained by a separate scanner; this module only
//! reads it. Everything is read up front so matching never touches I/O.

use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row};
use rustc_hash::FxHashSet;
use tracing::{info, warn};

use crate::error::{MatchError, Result};
use crate::models::{CatalogRecord, Diagnostic};

/// All catalog records for one run, plus problems met while reading them.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub records: Vec<CatalogRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CatalogSnapshot {
    pub fn from_records(records: Vec<CatalogRecord>) -> Self {
        Self {
            records,
            diagnostics: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Anything that can hand over the whole catalog in one call.
pub trait CatalogSource {
    fn load_all(&self) -> Result<CatalogSnapshot>;
}

impl CatalogSource for Vec<CatalogRecord> {
    fn load_all(&self) -> Result<CatalogSnapshot> {
        Ok(CatalogSnapshot::from_records(self.clone()))
    }
}

// ============================================================================
// SQLite catalog
// ============================================================================

/// Reads the scanner's `flacs` table.
///
/// Required column: `path`. Optional: `artist`, `album`, `title`,
/// `track_number` (or `trackno`), `isrc`. Missing optional columns read as
/// empty.
pub struct SqliteCatalog {
    path: PathBuf,
}

impl SqliteCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> MatchError {
        MatchError::CatalogUnavailable(format!("{}: {}", self.path.display(), reason))
    }

    fn columns(conn: &Connection) -> Result<FxHashSet<String>> {
        let mut stmt = conn.prepare("PRAGMA table_info(flacs)")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<FxHashSet<_>, _>>()?;
        Ok(names.into_iter().map(|n| n.to_lowercase()).collect())
    }

    fn read(&self, conn: &Connection) -> Result<CatalogSnapshot> {
        let columns = Self::columns(conn)?;
        if columns.is_empty() {
            return Err(self.unavailable("no `flacs` table"));
        }
        if !columns.contains("path") {
            return Err(self.unavailable("`flacs` table has no `path` column"));
        }

        let pick = |name: &str| if columns.contains(name) { name.to_string() } else { "NULL".to_string() };
        let track_col = if columns.contains("track_number") {
            "track_number".to_string()
        } else {
            pick("trackno")
        };
        let sql = format!(
            "SELECT path, {}, {}, {}, {}, {} FROM flacs ORDER BY path",
            pick("artist"),
            pick("album"),
            pick("title"),
            track_col,
            pick("isrc")
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut snapshot = CatalogSnapshot::default();
        let mut row_number = 0usize;

        while let Some(row) = rows.next()? {
            row_number += 1;
            match text_at(row, 0) {
                Some(path) if !path.trim().is_empty() => snapshot.records.push(CatalogRecord {
                    path,
                    artist: text_at(row, 1).unwrap_or_default(),
                    album: text_at(row, 2).unwrap_or_default(),
                    title: text_at(row, 3).unwrap_or_default(),
                    track_number: text_at(row, 4).filter(|s| !s.trim().is_empty()),
                    isrc: text_at(row, 5).filter(|s| !s.trim().is_empty()),
                }),
                _ => {
                    let message = format!("catalog row {} has no readable path", row_number);
                    warn!("{}", message);
                    snapshot.diagnostics.push(Diagnostic::malformed(message));
                }
            }
        }

        Ok(snapshot)
    }
}

/// Column value as text, whatever its storage class. NULL is `None`.
fn text_at(row: &Row<'_>, idx: usize) -> Option<String> {
    match row.get_ref(idx).ok()? {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

impl CatalogSource for SqliteCatalog {
    fn load_all(&self) -> Result<CatalogSnapshot> {
        if !self.path.exists() {
            return Err(self.unavailable("file does not exist"));
        }
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| self.unavailable(e))?;

        let snapshot = self.read(&conn).map_err(|e| match e {
            MatchError::CatalogUnavailable(_) => e,
            other => self.unavailable(other),
        })?;

        info!(
            "Read {} catalog records from {:?} ({} unreadable)",
            snapshot.records.len(),
            self.path,
            snapshot.diagnostics.len()
        );
        Ok(snapshot)
    }
}

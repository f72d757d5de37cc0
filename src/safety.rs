//! Safety checks run before any export is written.
//!
//! Exports are written next to the inputs they were built from, so a typo on
//! the command line must not clobber the catalog database, the playlist or
//! the normalization cache.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

/// Files that must never be overwritten by an export, whatever their name.
const PROTECTED_EXTENSIONS: &[&str] = &["db", "sqlite", "sqlite3"];

fn resolved(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Validates that an export path is safe to overwrite.
///
/// Checks:
/// - Output extension must be one of `expected_extensions` (case-insensitive)
/// - Output cannot be any of the `protected` inputs, compared after
///   resolving symlinks and relative components when the files exist
/// - Output cannot carry a database extension
pub fn validate_output_path(output: &Path, expected_extensions: &[&str], protected: &[&Path]) -> Result<()> {
    let extension = output
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if PROTECTED_EXTENSIONS.contains(&extension.as_str()) {
        bail!(
            "Safety check failed: output '{}' looks like a database file",
            output.display()
        );
    }

    if !expected_extensions.iter().any(|e| e.eq_ignore_ascii_case(&extension)) {
        bail!(
            "Safety check failed: output file '{}' must end in .{}",
            output.display(),
            expected_extensions.join(" or .")
        );
    }

    let target = resolved(output);
    for input in protected {
        if output == *input || target == resolved(input) {
            bail!(
                "Safety check failed: output '{}' cannot be the same as input '{}'",
                output.display(),
                input.display()
            );
        }
    }

    Ok(())
}

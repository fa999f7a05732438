//! Utility functions for string handling and file system checks.
//!
//! This module provides helpers used throughout the harvest:
//! - String truncation for log previews of titles and bodies
//! - Whitespace collapsing for the plain-text fallback
//! - Collection file naming for the document store
//! - File system validation for the storage root

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a character boundary) with
/// an ellipsis and a byte count appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n+").unwrap());

/// Collapse runs of spaces and blank lines, keeping paragraph breaks.
pub fn collapse_whitespace(text: &str) -> String {
    let spaced = WHITESPACE_RUN.replace_all(text, " ");
    let lines = spaced
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_LINES.replace_all(&lines, "\n\n").trim().to_string()
}

/// File name of the collection written by one outlet run:
/// `<unix_epoch_seconds><outlet_name>.db.json`.
///
/// Path separators and other characters that cannot appear in a file name are
/// replaced with `_`. When that changes the name, the first 8 hex digits of
/// the raw name's SHA-256 are appended so `A/B` and `A:B` get different files.
pub fn collection_file_name(epoch_secs: i64, outlet_name: &str) -> String {
    let safe: String = outlet_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if safe == outlet_name {
        return format!("{}{}.db.json", epoch_secs, safe);
    }
    let digest = format!("{:x}", Sha256::digest(outlet_name.as_bytes()));
    format!("{}{}-{}.db.json", epoch_secs, safe, &digest[..8])
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a probe file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or is not writable.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Storage directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

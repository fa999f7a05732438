//! Data models for outlets, discovered resources, and harvested articles.
//!
//! This module defines the values that flow through a harvest:
//! - [`Outlet`]: one configured news source, read-only for the whole run
//! - [`RawResource`]: one discovered article link, consumed by exactly one task
//! - [`RawContent`]: the downloaded body of a resource
//! - [`Extracted`]: what the extraction service made of a body
//! - [`Article`]: the validated record that is deduplicated and persisted
//!
//! Session statistics live in [`crate::session`].

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

/// Extracted text must be strictly longer than this many characters.
pub const MIN_TEXT_LEN: usize = 10;

/// A news source as supplied by the outlet directory.
///
/// Unknown fields in the directory payload are ignored. A missing or `null`
/// URL reads as empty, so the outlet is skipped later instead of failing the
/// whole listing. An outlet without an `active` flag is assumed active.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Outlet {
    /// Display name; also part of the collection file name.
    pub name: String,
    /// Listing page or feed the outlet's articles are discovered from.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub url: String,
    #[serde(default = "default_active", deserialize_with = "null_as_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_active<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or_else(default_active))
}

impl Outlet {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            active: true,
        }
    }

    /// An outlet is only processed when its URL has non-whitespace content.
    pub fn is_eligible(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// Reference to one article discovered on an outlet's listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawResource {
    pub url: String,
}

impl RawResource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// How the body of a [`RawContent`] should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Html,
    /// Markup already stripped; produced by the fallback path.
    PlainText,
}

/// Downloaded body of one resource.
#[derive(Debug, Clone)]
pub struct RawContent {
    pub url: String,
    pub body: String,
    pub format: ContentFormat,
}

/// Structured fields the extraction service pulled out of a body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub title: String,
    pub text: String,
    pub publish_date: Option<DateTime<Utc>>,
    pub authors: Vec<String>,
}

/// A validated article, ready for deduplication and storage.
///
/// Serialized flat; this is the document shape written to the store.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Article {
    /// Hex SHA-256 of the normalized title and text.
    pub id: String,
    pub title: String,
    pub text: String,
    pub publish_date: Option<DateTime<Utc>>,
    /// Name of the outlet the article was harvested from.
    pub source: String,
    pub category: Option<String>,
    pub url: String,
    #[serde(default)]
    pub authors: Vec<String>,
}

impl Article {
    /// Build an article from extracted fields, fingerprinting the content and
    /// deriving a category from the URL path.
    pub fn from_extracted(extracted: Extracted, url: &str, source: &str) -> Self {
        let id = fingerprint(&extracted.title, &extracted.text);
        Self {
            id,
            category: derive_category(url),
            title: extracted.title,
            text: extracted.text,
            publish_date: extracted.publish_date,
            source: source.to_string(),
            url: url.to_string(),
            authors: extracted.authors,
        }
    }
}

/// Stable content fingerprint: identical title and text always hash the same,
/// whatever URL they were served from.
pub fn fingerprint(title: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.trim().as_bytes());
    hasher.update(b"\n");
    hasher.update(text.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

static SECTION_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z-]*$").unwrap());

/// Derive a section name from a URL path.
///
/// Takes the first path segment that reads like a word, ignoring dates,
/// numeric ids, and the final segment (usually the article slug).
/// For example `https://example.com/politics/2025/05/06/some-story` gives
/// `politics`.
pub fn derive_category(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segments: Vec<String> = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect();
    let (_, sections) = segments.split_last()?;
    sections
        .iter()
        .find(|s| SECTION_SEGMENT.is_match(s))
        .cloned()
}

//! Error taxonomy for the harvest pipeline.
//!
//! Every error here is recovered somewhere below [`HarvestRunner`](crate::runner::HarvestRunner)
//! except [`DirectoryError`], which ends a run before any outlet is touched.
//!
//! | Error | Raised by | Recovery |
//! |-------|-----------|----------|
//! | [`ValidationError`] | outlet check, `normalize`, text length check | counted as a failed article |
//! | [`ExtractionError`] | discovery, `fetch`, failed fallback | counted as a failed article |
//! | [`StoreError::Query`] | dedup lookup | item treated as not-a-duplicate |
//! | [`StoreError::Write`] | batch persist | logged, stats kept |
//! | [`SinkError`] | session reporting | logged, next outlet continues |
//! | [`DirectoryError`] | outlet listing | run aborted with an empty result |

use std::path::PathBuf;
use thiserror::Error;

/// Content could not be downloaded or turned into an article.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid url {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("could not parse {url}: {reason}")]
    Parse { url: String, reason: String },
    #[error("fallback extraction failed for {url}: {source}")]
    Fallback {
        url: String,
        #[source]
        source: ValidationError,
    },
}

/// Input that is well-formed on the wire but unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("outlet {0:?} has no usable url")]
    EmptyOutletUrl(String),
    #[error("no title found")]
    MissingTitle,
    #[error("no body text found")]
    MissingText,
    #[error("text too short ({len} chars, need more than {min})")]
    TextTooShort { len: usize, min: usize },
}

/// Why a single item task produced no article.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("worker aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query against {path} failed: {reason}")]
    Query { path: PathBuf, reason: String },
    #[error("write to {path} failed: {reason}")]
    Write { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("session report rejected: {0}")]
    Http(#[from] reqwest::Error),
    #[error("could not encode session report: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("outlet listing request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("could not read outlet file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed outlet listing: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

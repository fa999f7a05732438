//! File-backed deduplication store.
//!
//! Every outlet run appends to its own collection file named
//! `<unix_epoch_seconds><outlet_name>.db.json` under the storage root. The file
//! holds a single document table:
//!
//! ```text
//! {"_default": {"1": {...article...}, "2": {...article...}}}
//! ```
//!
//! Collections are append-only. Lookups see either the current run's
//! collection or every collection under the root, per [`DedupScope`].
//!
//! Lookups fail soft: a collection that cannot be read or parsed is logged and
//! the item is treated as new. Losing a duplicate is preferred over losing a
//! run.

use crate::config::DedupScope;
use crate::error::StoreError;
use crate::models::Article;
use crate::utils::collection_file_name;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info, instrument, warn};

const COLLECTION_SUFFIX: &str = ".db.json";
const DEFAULT_TABLE: &str = "_default";

/// Lookup and append operations the orchestrator needs from a store.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Has an article with this id been stored? Must not fail.
    async fn exists(&self, id: &str) -> bool;

    /// Append articles, skipping ids already stored. Returns how many were written.
    async fn insert_batch(&self, records: &[Article]) -> Result<usize, StoreError>;
}

/// On-disk layout of one collection file.
#[derive(Debug, Default, Deserialize, Serialize)]
struct CollectionFile {
    #[serde(rename = "_default", default)]
    documents: BTreeMap<u64, Article>,
}

/// Deduplication and persistence for one outlet run.
#[derive(Debug)]
pub struct DedupStore {
    root: PathBuf,
    collection: PathBuf,
    scope: DedupScope,
    /// Ids from collections other than this run's, loaded on first lookup.
    history: OnceCell<HashSet<String>>,
    /// Serializes appends to this run's collection.
    write_lock: Mutex<()>,
}

impl DedupStore {
    /// Open the store for the run of `outlet_name` started at `started_at`.
    ///
    /// Nothing is touched on disk until the first lookup or insert.
    pub fn for_run(
        root: impl Into<PathBuf>,
        started_at: DateTime<Utc>,
        outlet_name: &str,
        scope: DedupScope,
    ) -> Self {
        let root = root.into();
        let collection = root.join(collection_file_name(started_at.timestamp(), outlet_name));
        Self {
            root,
            collection,
            scope,
            history: OnceCell::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of this run's collection file.
    pub fn collection_path(&self) -> &Path {
        &self.collection
    }

    /// Has an article with this id been stored in a visible collection?
    ///
    /// Returns `false` when the lookup itself fails.
    #[instrument(level = "debug", skip(self), fields(collection = %self.collection.display()))]
    pub async fn exists(&self, id: &str) -> bool {
        match self.try_exists(id).await {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, id, "Dedup lookup failed; treating article as new");
                false
            }
        }
    }

    async fn try_exists(&self, id: &str) -> Result<bool, StoreError> {
        let current = read_collection(&self.collection).await?;
        if current.documents.values().any(|a| a.id == id) {
            return Ok(true);
        }
        match self.scope {
            DedupScope::CurrentRun => Ok(false),
            DedupScope::AllHistory => {
                let history = self
                    .history
                    .get_or_try_init(|| load_history(&self.root, &self.collection))
                    .await?;
                Ok(history.contains(id))
            }
        }
    }

    /// Append articles to this run's collection.
    ///
    /// Ids already present in the collection are skipped, so an article is
    /// stored at most once per run.
    #[instrument(level = "info", skip_all, fields(collection = %self.collection.display(), count = records.len()))]
    pub async fn insert_batch(&self, records: &[Article]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;

        let mut file = read_collection(&self.collection)
            .await
            .map_err(|e| StoreError::Write {
                path: self.collection.clone(),
                reason: e.to_string(),
            })?;
        let mut seen: HashSet<String> = file.documents.values().map(|a| a.id.clone()).collect();
        let mut next_id = file.documents.keys().next_back().copied().unwrap_or(0) + 1;
        let mut inserted = 0;
        for record in records {
            if !seen.insert(record.id.clone()) {
                warn!(id = %record.id, "Article already in collection; not inserting twice");
                continue;
            }
            file.documents.insert(next_id, record.clone());
            next_id += 1;
            inserted += 1;
        }

        if let Some(parent) = self.collection.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| write_error(&self.collection, e))?;
        }
        let json = serde_json::to_vec(&file).map_err(|e| write_error(&self.collection, e))?;
        // Write beside the target then rename, so readers never see half a file.
        let tmp = self.collection.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| write_error(&self.collection, e))?;
        fs::rename(&tmp, &self.collection)
            .await
            .map_err(|e| write_error(&self.collection, e))?;

        info!(inserted, "Saved articles to collection");
        Ok(inserted)
    }
}

#[async_trait]
impl ArticleStore for DedupStore {
    async fn exists(&self, id: &str) -> bool {
        DedupStore::exists(self, id).await
    }

    async fn insert_batch(&self, records: &[Article]) -> Result<usize, StoreError> {
        DedupStore::insert_batch(self, records).await
    }
}

fn write_error(path: &Path, e: impl std::fmt::Display) -> StoreError {
    StoreError::Write {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Read a collection; a file that does not exist yet is an empty collection.
async fn read_collection(path: &Path) -> Result<CollectionFile, StoreError> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CollectionFile::default()),
        Err(e) => {
            return Err(StoreError::Query {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(CollectionFile::default());
    }
    serde_json::from_slice(&raw).map_err(|e| StoreError::Query {
        path: path.to_path_buf(),
        reason: format!("{DEFAULT_TABLE} table unreadable: {e}"),
    })
}

/// Collect ids from every collection under `root` except `exclude`.
///
/// A collection that cannot be parsed is skipped with a warning; a root that
/// cannot be listed fails the lookup.
async fn load_history(root: &Path, exclude: &Path) -> Result<HashSet<String>, StoreError> {
    let mut ids = HashSet::new();
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
        Err(e) => {
            return Err(StoreError::Query {
                path: root.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };

    let mut collections = 0usize;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                return Err(StoreError::Query {
                    path: root.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };
        let path = entry.path();
        let is_collection = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(COLLECTION_SUFFIX));
        if !is_collection || path == exclude {
            continue;
        }
        match read_collection(&path).await {
            Ok(file) => {
                collections += 1;
                ids.extend(file.documents.into_values().map(|a| a.id));
            }
            Err(e) => warn!(error = %e, "Skipping unreadable collection"),
        }
    }

    debug!(collections, ids = ids.len(), "Loaded dedup history");
    Ok(ids)
}

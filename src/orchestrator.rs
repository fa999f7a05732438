//! End-to-end processing of a single outlet.
//!
//! An [`OutletOrchestrator`] walks one outlet through these phases:
//!
//! ```text
//! Created → Validating → Fetching → Dispatching → Aggregating → Persisting → Completed
//! ```
//!
//! Early exits (ineligible URL, failed or empty discovery) jump straight to
//! `Completed`. Whatever happens in between, including a panic inside
//! discovery or persistence, the session is finalized exactly once with an end
//! time and `completed = true`.
//!
//! Aggregation is the only place outcomes are counted. It consumes the pool's
//! stream one outcome at a time, so the counters need no synchronization, and
//! it never depends on completion order.

use crate::config::HarvestConfig;
use crate::error::ValidationError;
use crate::extract::Extractor;
use crate::models::{Article, Outlet};
use crate::pool::{OutletPool, TaskOutcome};
use crate::session::{SessionStart, SessionStats, SessionTally, Tally};
use crate::store::{ArticleStore, DedupStore};
use crate::utils::truncate_for_log;
use futures::{FutureExt, StreamExt};
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Where an outlet run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Created,
    Validating,
    Fetching,
    Dispatching,
    Aggregating,
    Persisting,
    Completed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of one outlet run.
#[derive(Debug)]
pub struct OutletRun {
    pub session: SessionStats,
    /// Articles accepted this run, in acceptance order.
    pub batch: Vec<Article>,
    /// How many of `batch` were written to the collection; 0 if saving failed.
    pub persisted: usize,
    /// Last phase entered before `Completed`.
    pub last_phase: Phase,
}

/// Mutable state of a run in progress; only the orchestrator touches it.
struct Progress {
    phase: Phase,
    tally: SessionTally,
    batch: Vec<Article>,
    accepted_ids: HashSet<String>,
    persisted: usize,
}

impl Progress {
    fn new() -> Self {
        Self {
            phase: Phase::Created,
            tally: SessionTally::default(),
            batch: Vec::new(),
            accepted_ids: HashSet::new(),
            persisted: 0,
        }
    }

    fn enter(&mut self, phase: Phase, outlet: &str) {
        debug!(outlet, from = %self.phase, to = %phase, "Phase transition");
        self.phase = phase;
    }
}

#[derive(Clone)]
pub struct OutletOrchestrator {
    extractor: Arc<dyn Extractor>,
    config: Arc<HarvestConfig>,
}

impl OutletOrchestrator {
    pub fn new(extractor: Arc<dyn Extractor>, config: Arc<HarvestConfig>) -> Self {
        Self { extractor, config }
    }

    /// Harvest one outlet. Never fails; problems show up in the session counts
    /// and the logs.
    #[instrument(level = "info", skip_all, fields(outlet = %outlet.name))]
    pub async fn run(&self, outlet: &Outlet) -> OutletRun {
        let start = SessionStart::now(&outlet.name);
        let store = DedupStore::for_run(
            &self.config.storage_root,
            start.start_time,
            &outlet.name,
            self.config.dedup_scope,
        );
        debug!(collection = %store.collection_path().display(), "Opened collection");
        self.run_with_store(outlet, start, &store).await
    }

    /// Drive one outlet against `store`, finalizing `start` however the run ends.
    pub(crate) async fn run_with_store(
        &self,
        outlet: &Outlet,
        start: SessionStart,
        store: &dyn ArticleStore,
    ) -> OutletRun {
        let mut progress = Progress::new();

        let driven = AssertUnwindSafe(self.drive(outlet, store, &mut progress))
            .catch_unwind()
            .await;
        if driven.is_err() {
            error!(phase = %progress.phase, "Outlet run panicked; finalizing session");
        }

        let last_phase = progress.phase;
        progress.enter(Phase::Completed, &outlet.name);
        let session = start.finalize(progress.tally);
        info!(
            total = session.total_articles,
            successful = session.successful_articles,
            failed = session.failed_articles,
            last_phase = %last_phase,
            "Outlet session completed"
        );
        OutletRun {
            session,
            batch: progress.batch,
            persisted: progress.persisted,
            last_phase,
        }
    }

    async fn drive(&self, outlet: &Outlet, store: &dyn ArticleStore, progress: &mut Progress) {
        progress.enter(Phase::Validating, &outlet.name);
        if !outlet.is_eligible() {
            warn!(error = %ValidationError::EmptyOutletUrl(outlet.name.clone()), "Skipping outlet");
            return;
        }

        progress.enter(Phase::Fetching, &outlet.name);
        let resources = match self.extractor.discover(outlet).await {
            Ok(resources) => resources,
            Err(e) => {
                error!(error = %e, "Loading articles failed");
                return;
            }
        };
        if resources.is_empty() {
            info!("No articles found");
            return;
        }

        progress.enter(Phase::Dispatching, &outlet.name);
        progress.tally = progress.tally.dispatched(resources.len());
        info!(count = resources.len(), "Processing articles");
        let pool = OutletPool::new(outlet, Arc::clone(&self.extractor), self.config.worker_count);
        let mut outcomes = Box::pin(pool.run(resources));

        progress.enter(Phase::Aggregating, &outlet.name);
        while let Some(outcome) = outcomes.next().await {
            let tally = self.aggregate(outcome, store, progress).await;
            progress.tally = progress.tally.record(tally);
        }
        drop(outcomes);

        progress.enter(Phase::Persisting, &outlet.name);
        if progress.batch.is_empty() {
            return;
        }
        info!(count = progress.batch.len(), "Saving articles");
        match store.insert_batch(&progress.batch).await {
            Ok(written) => progress.persisted = written,
            Err(e) => error!(error = %e, "Saving articles failed"),
        }
    }

    /// Decide how one outcome counts, keeping accepted articles in the batch.
    async fn aggregate(
        &self,
        outcome: TaskOutcome,
        store: &dyn ArticleStore,
        progress: &mut Progress,
    ) -> Tally {
        let article = match outcome {
            TaskOutcome::Accepted(article) => article,
            TaskOutcome::Failed(failure) => {
                warn!(
                    resource = failure.resource.as_deref().unwrap_or("<unknown>"),
                    error = %failure.reason,
                    "Article failed"
                );
                return Tally::Failed;
            }
        };

        let title = truncate_for_log(&article.title, 20);
        if progress.accepted_ids.contains(&article.id) || store.exists(&article.id).await {
            warn!(id = %article.id, %title, "Article already exists");
            return Tally::Failed;
        }
        debug!(id = %article.id, %title, "Article accepted");
        progress.accepted_ids.insert(article.id.clone());
        progress.batch.push(article);
        Tally::Successful
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::DedupScope;
    use crate::error::ExtractionError;
    use crate::models::{ContentFormat, Extracted, RawContent, RawResource};
    use crate::task::testing::*;
    use async_trait::async_trait;
    use std::path::Path;

    pub(crate) fn config(root: &Path, scope: DedupScope) -> Arc<HarvestConfig> {
        Arc::new(HarvestConfig {
            storage_root: root.to_path_buf(),
            dedup_scope: scope,
            worker_count: 3,
            ..HarvestConfig::default()
        })
    }

    fn orchestrator(extractor: ScriptedExtractor, root: &Path) -> OutletOrchestrator {
        OutletOrchestrator::new(Arc::new(extractor), config(root, DedupScope::AllHistory))
    }

    fn assert_balanced(run: &OutletRun) {
        let s = &run.session;
        assert!(s.completed);
        assert!(s.end_time >= s.start_time);
        assert_eq!(s.successful_articles + s.failed_articles, s.total_articles);
    }

    #[tokio::test]
    async fn test_blank_url_completes_empty() {
        let tmp = tempfile::tempdir().unwrap();
        for url in ["", "   ", "\t\n"] {
            let run = orchestrator(ScriptedExtractor::default(), tmp.path())
                .run(&Outlet::new("Blank", url))
                .await;
            assert_balanced(&run);
            assert_eq!(run.session.total_articles, 0);
            assert_eq!(run.session.successful_articles, 0);
            assert_eq!(run.last_phase, Phase::Validating);
        }
    }

    #[tokio::test]
    async fn test_partial_failure_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let extractor = ScriptedExtractor::default().with_listing(
            "https://wire.example",
            vec![
                ("https://wire.example/a/one", article("One", "First story body text")),
                ("https://wire.example/a/two", Script::FetchError),
                ("https://wire.example/a/three", article("Three", "Third story body text")),
                ("https://wire.example/a/four", Script::Garbage),
                ("https://wire.example/a/five", article("Five", "Fifth story body text")),
            ],
        );
        let run = orchestrator(extractor, tmp.path())
            .run(&Outlet::new("Wire", "https://wire.example"))
            .await;
        assert_balanced(&run);
        assert_eq!(run.session.total_articles, 5);
        assert_eq!(run.session.successful_articles, 3);
        assert_eq!(run.session.failed_articles, 2);
        assert_eq!(run.batch.len(), 3);
        assert_eq!(run.last_phase, Phase::Persisting);
    }

    #[tokio::test]
    async fn test_duplicates_within_run_count_as_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let extractor = ScriptedExtractor::default().with_listing(
            "https://wire.example",
            vec![
                ("https://wire.example/a/original", article("Same", "Identical body text here")),
                ("https://wire.example/b/syndicated", article("Same", "Identical body text here")),
                ("https://wire.example/a/other", article("Other", "A different body text")),
            ],
        );
        let run = orchestrator(extractor, tmp.path())
            .run(&Outlet::new("Wire", "https://wire.example"))
            .await;
        assert_balanced(&run);
        assert_eq!(run.session.successful_articles, 2);
        assert_eq!(run.session.failed_articles, 1);
        let ids: HashSet<_> = run.batch.iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids.len(), run.batch.len());
    }

    #[tokio::test]
    async fn test_previously_stored_articles_are_duplicates() {
        let tmp = tempfile::tempdir().unwrap();
        let pages = || {
            ScriptedExtractor::default().with_listing(
                "https://wire.example",
                vec![("https://wire.example/a/one", article("One", "First story body text"))],
            )
        };
        let outlet = Outlet::new("Wire", "https://wire.example");

        let first = orchestrator(pages(), tmp.path()).run(&outlet).await;
        assert_eq!(first.session.successful_articles, 1);

        let second = orchestrator(pages(), tmp.path()).run(&outlet).await;
        assert_balanced(&second);
        assert_eq!(second.session.successful_articles, 0);
        assert_eq!(second.session.failed_articles, 1);
        assert!(second.batch.is_empty());
    }

    #[tokio::test]
    async fn test_batch_is_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let extractor = ScriptedExtractor::default().with_listing(
            "https://wire.example",
            vec![("https://wire.example/a/one", article("One", "First story body text"))],
        );
        let outlet = Outlet::new("Wire", "https://wire.example");
        let run = orchestrator(extractor, tmp.path()).run(&outlet).await;
        assert_eq!(run.persisted, 1);

        let store = DedupStore::for_run(
            tmp.path(),
            run.session.start_time,
            &outlet.name,
            DedupScope::CurrentRun,
        );
        assert!(store.exists(&run.batch[0].id).await);
    }

    #[tokio::test]
    async fn test_failed_discovery_still_finalizes() {
        let tmp = tempfile::tempdir().unwrap();
        let extractor = ScriptedExtractor::default().with_failing_listing("https://wire.example");
        let run = orchestrator(extractor, tmp.path())
            .run(&Outlet::new("Wire", "https://wire.example"))
            .await;
        assert_balanced(&run);
        assert_eq!(run.session.total_articles, 0);
        assert_eq!(run.last_phase, Phase::Fetching);
    }

    #[tokio::test]
    async fn test_panicking_discovery_still_finalizes() {
        let tmp = tempfile::tempdir().unwrap();
        let extractor = ScriptedExtractor {
            panic_on_discover: true,
            ..ScriptedExtractor::default()
        };
        let run = orchestrator(extractor, tmp.path())
            .run(&Outlet::new("Wire", "https://wire.example"))
            .await;
        assert_balanced(&run);
        assert_eq!(run.last_phase, Phase::Fetching);
    }

    #[tokio::test]
    async fn test_empty_listing_completes() {
        let tmp = tempfile::tempdir().unwrap();
        let extractor = ScriptedExtractor::default().with_listing("https://wire.example", vec![]);
        let run = orchestrator(extractor, tmp.path())
            .run(&Outlet::new("Wire", "https://wire.example"))
            .await;
        assert_balanced(&run);
        assert_eq!(run.session.total_articles, 0);
        assert_eq!(run.last_phase, Phase::Fetching);
    }

    #[tokio::test]
    async fn test_unwritable_store_keeps_stats() {
        let tmp = tempfile::tempdir().unwrap();
        // A regular file where the storage directory should be.
        let blocker = tmp.path().join("storage");
        std::fs::write(&blocker, "not a directory").unwrap();

        let extractor = ScriptedExtractor::default().with_listing(
            "https://wire.example",
            vec![("https://wire.example/a/one", article("One", "First story body text"))],
        );
        let run = OutletOrchestrator::new(Arc::new(extractor), config(&blocker, DedupScope::CurrentRun))
            .run(&Outlet::new("Wire", "https://wire.example"))
            .await;
        assert_balanced(&run);
        assert_eq!(run.session.successful_articles, 1);
        assert_eq!(run.batch.len(), 1);
        assert_eq!(run.persisted, 0);
        assert_eq!(run.last_phase, Phase::Persisting);
    }

    /// Panics on the second fetch, after the pool is already running.
    struct ExplodingNormalizer;

    #[async_trait]
    impl Extractor for ExplodingNormalizer {
        async fn discover(&self, _outlet: &Outlet) -> Result<Vec<RawResource>, ExtractionError> {
            Ok(vec![
                RawResource::new("https://wire.example/a/one"),
                RawResource::new("https://wire.example/a/two"),
            ])
        }

        async fn fetch(&self, resource: &RawResource) -> Result<RawContent, ExtractionError> {
            Ok(RawContent {
                url: resource.url.clone(),
                body: String::new(),
                format: ContentFormat::Html,
            })
        }

        fn normalize(&self, content: &RawContent) -> Result<Extracted, crate::error::ValidationError> {
            if content.url.ends_with("two") {
                panic!("normalizer bug");
            }
            Ok(Extracted {
                title: "One".to_string(),
                text: "First story body text".to_string(),
                ..Extracted::default()
            })
        }
    }

    #[tokio::test]
    async fn test_worker_panic_is_a_failed_article() {
        let tmp = tempfile::tempdir().unwrap();
        let run = OutletOrchestrator::new(
            Arc::new(ExplodingNormalizer),
            config(tmp.path(), DedupScope::CurrentRun),
        )
        .run(&Outlet::new("Wire", "https://wire.example"))
        .await;
        assert_balanced(&run);
        assert_eq!(run.session.total_articles, 2);
        assert_eq!(run.session.successful_articles, 1);
        assert_eq!(run.session.failed_articles, 1);
    }

    /// In-memory store that can be told to blow up.
    #[derive(Default)]
    struct FaultyStore {
        /// Panic on this 1-based `exists` call.
        panic_on_lookup: Option<usize>,
        panic_on_insert: bool,
        lookups: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ArticleStore for FaultyStore {
        async fn exists(&self, _id: &str) -> bool {
            let call = self.lookups.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            if self.panic_on_lookup == Some(call) {
                panic!("lookup failed hard");
            }
            false
        }

        async fn insert_batch(&self, records: &[Article]) -> Result<usize, crate::error::StoreError> {
            if self.panic_on_insert {
                panic!("disk on fire");
            }
            Ok(records.len())
        }
    }

    fn three_stories() -> ScriptedExtractor {
        ScriptedExtractor::default().with_listing(
            "https://wire.example",
            vec![
                ("https://wire.example/a/one", article("One", "First story body text")),
                ("https://wire.example/a/two", article("Two", "Second story body text")),
                ("https://wire.example/a/three", article("Three", "Third story body text")),
            ],
        )
    }

    #[tokio::test]
    async fn test_panic_while_persisting_still_finalizes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaultyStore {
            panic_on_insert: true,
            ..FaultyStore::default()
        };
        let run = orchestrator(three_stories(), tmp.path())
            .run_with_store(
                &Outlet::new("Wire", "https://wire.example"),
                SessionStart::now("Wire"),
                &store,
            )
            .await;
        assert_balanced(&run);
        assert_eq!(run.session.total_articles, 3);
        assert_eq!(run.session.successful_articles, 3);
        assert_eq!(run.persisted, 0);
        assert_eq!(run.last_phase, Phase::Persisting);
    }

    #[tokio::test]
    async fn test_panic_mid_aggregation_counts_the_rest_as_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaultyStore {
            panic_on_lookup: Some(2),
            ..FaultyStore::default()
        };
        let run = orchestrator(three_stories(), tmp.path())
            .run_with_store(
                &Outlet::new("Wire", "https://wire.example"),
                SessionStart::now("Wire"),
                &store,
            )
            .await;
        assert_balanced(&run);
        assert_eq!(run.session.total_articles, 3);
        assert_eq!(run.session.successful_articles, 1);
        assert_eq!(run.session.failed_articles, 2);
        assert_eq!(run.batch.len(), 1);
        assert_eq!(run.persisted, 0);
        assert_eq!(run.last_phase, Phase::Aggregating);
    }
}

//! Top-level harvest driver.
//!
//! [`HarvestRunner::run_all`] fetches the active outlets and runs one
//! [`OutletOrchestrator`] per outlet. A single outlet runs directly; several
//! run as separate tokio tasks, up to `outlet_concurrency` at a time, so slow
//! synchronous work in one outlet never holds up the others. Outlets share no
//! mutable state: each writes its own collection file.
//!
//! Every finished session is reported from its own task as soon as the outlet
//! completes, not batched. A reporting failure is logged and the remaining
//! outlets carry on. The only failure that ends a run early is not being able
//! to list the outlets at all.

use crate::config::HarvestConfig;
use crate::directory::OutletDirectory;
use crate::extract::Extractor;
use crate::models::Outlet;
use crate::orchestrator::{OutletOrchestrator, OutletRun};
use crate::sink::SessionSink;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

pub struct HarvestRunner {
    directory: Arc<dyn OutletDirectory>,
    sink: Arc<dyn SessionSink>,
    orchestrator: Arc<OutletOrchestrator>,
    outlet_concurrency: usize,
}

impl HarvestRunner {
    pub fn new(
        config: Arc<HarvestConfig>,
        directory: Arc<dyn OutletDirectory>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn SessionSink>,
    ) -> Self {
        let outlet_concurrency = config.outlet_concurrency();
        Self {
            directory,
            sink,
            orchestrator: Arc::new(OutletOrchestrator::new(extractor, config)),
            outlet_concurrency,
        }
    }

    /// Harvest every active outlet, returning one [`OutletRun`] per outlet in
    /// completion order.
    #[instrument(level = "info", skip_all)]
    pub async fn run_all(&self) -> Vec<OutletRun> {
        let t0 = Instant::now();
        let outlets = match self.directory.list_active_outlets().await {
            Ok(outlets) => outlets,
            Err(e) => {
                error!(error = %e, "Could not get outlets; aborting harvest");
                return Vec::new();
            }
        };
        if outlets.is_empty() {
            warn!("No outlets found");
            return Vec::new();
        }

        let runs = if outlets.len() > 1 {
            self.run_concurrently(outlets).await
        } else {
            let mut runs = Vec::with_capacity(1);
            for outlet in &outlets {
                runs.push(run_outlet(&self.orchestrator, self.sink.as_ref(), outlet).await);
            }
            runs
        };

        let successful: usize = runs.iter().map(|r| r.session.successful_articles).sum();
        let failed: usize = runs.iter().map(|r| r.session.failed_articles).sum();
        info!(
            outlets = runs.len(),
            successful,
            failed,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Harvest complete"
        );
        runs
    }

    /// One spawned task per outlet; a new outlet starts whenever one finishes.
    async fn run_concurrently(&self, outlets: Vec<Outlet>) -> Vec<OutletRun> {
        info!(
            outlets = outlets.len(),
            concurrency = self.outlet_concurrency,
            "Harvesting outlets concurrently"
        );
        let mut runs = Vec::with_capacity(outlets.len());
        let mut pending = outlets.into_iter();
        let mut running = JoinSet::new();
        loop {
            while running.len() < self.outlet_concurrency {
                let Some(outlet) = pending.next() else {
                    break;
                };
                let orchestrator = Arc::clone(&self.orchestrator);
                let sink = Arc::clone(&self.sink);
                running.spawn(async move { run_outlet(&orchestrator, sink.as_ref(), &outlet).await });
            }
            match running.join_next().await {
                Some(Ok(run)) => runs.push(run),
                Some(Err(e)) => error!(error = %e, "Outlet task ended abnormally"),
                None => break,
            }
        }
        runs
    }
}

/// Run one outlet and report its session straight away.
async fn run_outlet(orchestrator: &OutletOrchestrator, sink: &dyn SessionSink, outlet: &Outlet) -> OutletRun {
    let run = orchestrator.run(outlet).await;
    debug!(outlet = %outlet.name, last_phase = %run.last_phase, "Reporting session");
    if let Err(e) = sink.report(&run.session).await {
        error!(outlet = %outlet.name, error = %e, "Error saving session");
    }
    run
}

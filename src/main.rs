//! # Outlet Harvest
//!
//! Harvests news articles from many outlets at once, drops articles that were
//! already stored, persists the rest as JSON document collections, and reports
//! per-outlet session statistics to a backoffice API.
//!
//! ## Usage
//!
//! ```sh
//! outlet_harvest scrape --backoffice-url https://backoffice.example/api
//! outlet_harvest SCRAPE --outlets-file outlets.yaml --storage-root ./storage
//! ```
//!
//! Without a mode argument the binary asks for one on stdin.
//!
//! ## Architecture
//!
//! 1. **Listing**: fetch active outlets from the backoffice (or a YAML file)
//! 2. **Discovery**: collect article links per outlet
//! 3. **Extraction**: download and parse articles on a bounded pool per outlet
//! 4. **Deduplication**: skip articles whose fingerprint is already stored
//! 5. **Persistence**: append accepted articles to the run's collection file
//! 6. **Reporting**: post each outlet's session summary as soon as it finishes

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod directory;
mod error;
mod extract;
mod models;
mod orchestrator;
mod pool;
mod runner;
mod session;
mod sink;
mod store;
mod task;
mod utils;

use cli::{Cli, Mode};
use config::HarvestConfig;
use directory::{BackofficeDirectory, FileDirectory, OutletDirectory};
use error::ConfigError;
use extract::HttpExtractor;
use runner::HarvestRunner;
use sink::{BackofficeSink, LogSink, RetryingSink, SessionSink};
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();
    debug!(?args.mode, ?args.config, "Parsed CLI arguments");

    let mode = match args.mode {
        Some(mode) => mode,
        None => match await_command().await? {
            Some(mode) => mode,
            None => return Ok(()),
        },
    };

    perform_action(mode, &args).await
}

/// Prompt for a mode on stdin.
///
/// Returns `None` when stdin closes, the user interrupts, or the input is not a
/// known mode (an error is printed in that case).
async fn await_command() -> Result<Option<Mode>, Box<dyn Error>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"Insert command to run: ").await?;
    stdout.flush().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let line = tokio::select! {
        line = lines.next_line() => line?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; exiting");
            return Ok(None);
        }
    };
    let Some(line) = line else {
        return Ok(None);
    };
    match Mode::parse_input(&line) {
        Some(mode) => Ok(Some(mode)),
        None => {
            eprintln!("Invalid mode {:?}; expected SCRAPE, DETOX or EXIT", line.trim());
            Ok(None)
        }
    }
}

async fn perform_action(mode: Mode, args: &Cli) -> Result<(), Box<dyn Error>> {
    match mode {
        Mode::Scrape => execute_scrape(args).await,
        Mode::Detox => {
            warn!("DETOX mode has no action; nothing to do");
            Ok(())
        }
        Mode::Exit => {
            info!("Exiting");
            Ok(())
        }
    }
}

#[instrument(level = "info", skip_all)]
async fn execute_scrape(args: &Cli) -> Result<(), Box<dyn Error>> {
    let start_time = std::time::Instant::now();
    info!(started_at = %chrono::Utc::now().to_rfc3339(), "Scrape starting");

    let config = Arc::new(HarvestConfig::resolve(args)?);
    ensure_writable_dir(&config.storage_root).await?;

    let api_client = reqwest::Client::builder()
        .timeout(config.http.timeout())
        .build()?;
    let extractor = Arc::new(HttpExtractor::new(&config.http)?);

    let directory: Arc<dyn OutletDirectory> = match (&config.outlets_file, &config.backoffice_url) {
        (Some(path), _) => Arc::new(FileDirectory::new(path)),
        (None, Some(url)) => Arc::new(BackofficeDirectory::new(
            api_client.clone(),
            url,
            config.api_token.clone(),
        )),
        (None, None) => {
            return Err(ConfigError::Invalid {
                field: "backoffice_url",
                reason: "either backoffice_url or outlets_file is required".to_string(),
            }
            .into());
        }
    };

    let sink: Arc<dyn SessionSink> = match &config.backoffice_url {
        Some(url) => Arc::new(RetryingSink::new(
            BackofficeSink::new(api_client, url, config.api_token.clone()),
            config.sink_retries,
            Duration::from_millis(500),
        )),
        None => Arc::new(LogSink),
    };

    let runner = HarvestRunner::new(Arc::clone(&config), directory, extractor, sink);
    let runs = runner.run_all().await;

    let elapsed = start_time.elapsed();
    info!(
        outlets = runs.len(),
        articles_accepted = runs.iter().map(|r| r.batch.len()).sum::<usize>(),
        articles_saved = runs.iter().map(|r| r.persisted).sum::<usize>(),
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        ended_at = %chrono::Utc::now().to_rfc3339(),
        "Scrape complete"
    );
    Ok(())
}

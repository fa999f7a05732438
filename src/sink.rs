//! Reporting finished sessions.
//!
//! Each outlet's [`SessionStats`] is handed to a [`SessionSink`] as soon as
//! the outlet finishes.
//!
//! - [`BackofficeSink`]: POSTs the JSON summary to the backoffice API
//! - [`RetryingSink`]: decorator adding exponential backoff to any sink
//! - [`LogSink`]: writes the summary to the log when no backoffice is set up
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use crate::error::SinkError;
use crate::session::SessionStats;
use async_trait::async_trait;
use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn report(&self, session: &SessionStats) -> Result<(), SinkError>;
}

/// Posts session summaries to `{base_url}/scrapesessions/`.
#[derive(Debug, Clone)]
pub struct BackofficeSink {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl BackofficeSink {
    pub fn new(client: reqwest::Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: format!("{}/scrapesessions/", base_url.trim_end_matches('/')),
            token,
        }
    }
}

#[async_trait]
impl SessionSink for BackofficeSink {
    #[instrument(level = "info", skip_all, fields(outlet = %session.outlet_name, endpoint = %self.endpoint))]
    async fn report(&self, session: &SessionStats) -> Result<(), SinkError> {
        let mut request = self.client.post(&self.endpoint).json(&session.to_report());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?;
        info!("Session reported");
        Ok(())
    }
}

/// Logs session summaries instead of sending them anywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl SessionSink for LogSink {
    async fn report(&self, session: &SessionStats) -> Result<(), SinkError> {
        let report = serde_json::to_string(&session.to_report())?;
        info!(outlet = %session.outlet_name, %report, "Session summary");
        Ok(())
    }
}

/// Wrapper that retries a failing [`SessionSink`] with exponential backoff.
pub struct RetryingSink<S> {
    inner: S,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<S> RetryingSink<S>
where
    S: SessionSink,
{
    /// Wrap `inner`, allowing up to `max_retries` extra attempts.
    pub fn new(inner: S, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(10),
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<S> fmt::Debug for RetryingSink<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingSink")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

#[async_trait]
impl<S> SessionSink for RetryingSink<S>
where
    S: SessionSink,
{
    #[instrument(level = "info", skip_all, fields(outlet = %session.outlet_name))]
    async fn report(&self, session: &SessionStats) -> Result<(), SinkError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.report(session).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_total = total_t0.elapsed().as_millis();
                    if attempt > self.max_retries {
                        error!(attempt, max = self.max_retries, elapsed_ms_total, error = %e, "report() exhausted retries");
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(attempt, max = self.max_retries, elapsed_ms_total, ?delay, error = %e, "report() attempt failed; backing off");
                    sleep(delay).await;
                }
            }
        }
    }
}

//! Per-outlet session statistics.
//!
//! Counters are never shared between tasks. The orchestrator is the single
//! consumer of task outcomes and folds each one into a [`SessionTally`] with
//! [`SessionTally::record`]. When the run ends, on any path, the tally is
//! finalized exactly once into an immutable [`SessionStats`].
//!
//! [`SessionStats::to_report`] renders the JSON summary handed to the
//! reporting sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How one resource ended up counting toward the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    Successful,
    /// Extraction or validation failure, or a duplicate.
    Failed,
}

/// Running counters for one outlet run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTally {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

impl SessionTally {
    /// Set the number of dispatched resources.
    pub fn dispatched(self, total: usize) -> Self {
        Self { total, ..self }
    }

    /// Fold one outcome into the counters.
    pub fn record(self, tally: Tally) -> Self {
        match tally {
            Tally::Successful => Self {
                successful: self.successful + 1,
                ..self
            },
            Tally::Failed => Self {
                failed: self.failed + 1,
                ..self
            },
        }
    }

    /// Resources dispatched but never accounted for.
    pub fn outstanding(&self) -> usize {
        self.total.saturating_sub(self.successful + self.failed)
    }
}

/// Start of an outlet run, before any counting.
#[derive(Debug, Clone)]
pub struct SessionStart {
    pub outlet_name: String,
    pub start_time: DateTime<Utc>,
}

impl SessionStart {
    pub fn now(outlet_name: &str) -> Self {
        Self {
            outlet_name: outlet_name.to_string(),
            start_time: Utc::now(),
        }
    }

    /// Close the session with the final tally.
    ///
    /// Resources that never reported back (an aborted pool) are counted as
    /// failed so that `successful + failed == total` always holds.
    pub fn finalize(self, tally: SessionTally) -> SessionStats {
        self.finalize_at(tally, Utc::now())
    }

    fn finalize_at(self, tally: SessionTally, end_time: DateTime<Utc>) -> SessionStats {
        SessionStats {
            outlet_name: self.outlet_name,
            start_time: self.start_time,
            end_time,
            completed: true,
            total_articles: tally.total,
            successful_articles: tally.successful,
            failed_articles: tally.failed + tally.outstanding(),
        }
    }
}

/// Finished statistics of one outlet run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    pub outlet_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub completed: bool,
    pub total_articles: usize,
    pub successful_articles: usize,
    pub failed_articles: usize,
}

impl SessionStats {
    /// Wall-clock duration of the run in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.end_time - self.start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// `successful / total`, or `0.0` for a run with no articles.
    pub fn success_rate(&self) -> f64 {
        if self.total_articles == 0 {
            return 0.0;
        }
        self.successful_articles as f64 / self.total_articles as f64
    }

    pub fn to_report(&self) -> SessionReport {
        SessionReport {
            data: SessionReportData {
                start_time: self.start_time.to_rfc3339(),
                end_time: self.end_time.to_rfc3339(),
                total_articles: self.total_articles,
                failed_articles: self.failed_articles,
                successful_articles: self.successful_articles,
                duration: self.duration_secs(),
                success_rate: self.success_rate(),
                outlet: self.outlet_name.clone(),
                completed_session: self.completed,
            },
        }
    }
}

/// Envelope posted to the reporting sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub data: SessionReportData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReportData {
    pub start_time: String,
    pub end_time: String,
    pub total_articles: usize,
    pub failed_articles: usize,
    pub successful_articles: usize,
    pub duration: f64,
    pub success_rate: f64,
    pub outlet: String,
    pub completed_session: bool,
}

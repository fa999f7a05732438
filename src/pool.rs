//! Bounded worker pool for the articles of one outlet.
//!
//! An [`OutletPool`] belongs to exactly one outlet run. It keeps at most
//! `workers` [`ItemTask`]s in flight on the tokio runtime, starting the next
//! pending resource as soon as one finishes, and yields [`TaskOutcome`]s in
//! completion order.
//!
//! A failing or panicking task becomes a [`TaskOutcome::Failed`] and never
//! affects its siblings. Dropping the pool (or the stream returned by
//! [`OutletPool::run`]) aborts whatever is still running, so workers are
//! released on every exit path.

use crate::error::TaskError;
use crate::extract::Extractor;
use crate::models::{Article, Outlet, RawResource};
use crate::task::ItemTask;
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub const DEFAULT_WORKERS: usize = 4;

/// Result of processing one resource.
#[derive(Debug)]
pub enum TaskOutcome {
    Accepted(Article),
    Failed(TaskFailure),
}

#[derive(Debug)]
pub struct TaskFailure {
    /// URL of the resource, unknown when the worker itself died.
    pub resource: Option<String>,
    pub reason: TaskError,
}

pub struct OutletPool {
    outlet: String,
    workers: usize,
    task: ItemTask,
    pending: VecDeque<RawResource>,
    running: JoinSet<TaskOutcome>,
}

impl OutletPool {
    /// Acquire a pool of `workers` (at least one) for `outlet`.
    pub fn new(outlet: &Outlet, extractor: Arc<dyn Extractor>, workers: usize) -> Self {
        Self {
            outlet: outlet.name.clone(),
            workers: workers.max(1),
            task: ItemTask::new(extractor, &outlet.name),
            pending: VecDeque::new(),
            running: JoinSet::new(),
        }
    }

    /// Submit one task per resource and stream the outcomes as they complete.
    ///
    /// The stream ends once every submitted task has reported back.
    pub fn run(mut self, resources: Vec<RawResource>) -> impl Stream<Item = TaskOutcome> + Send {
        debug!(outlet = %self.outlet, count = resources.len(), workers = self.workers, "Submitting item tasks");
        self.pending.extend(resources);
        stream::unfold(self, |mut pool| async move {
            let outcome = pool.next_outcome().await?;
            Some((outcome, pool))
        })
    }

    fn fill(&mut self) {
        while self.running.len() < self.workers {
            let Some(resource) = self.pending.pop_front() else {
                break;
            };
            let task = self.task.clone();
            self.running.spawn(async move {
                match task.execute(&resource).await {
                    Ok(article) => TaskOutcome::Accepted(article),
                    Err(reason) => TaskOutcome::Failed(TaskFailure {
                        resource: Some(resource.url),
                        reason,
                    }),
                }
            });
        }
    }

    async fn next_outcome(&mut self) -> Option<TaskOutcome> {
        self.fill();
        let joined = self.running.join_next().await?;
        Some(match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(outlet = %self.outlet, error = %e, "Item worker died");
                TaskOutcome::Failed(TaskFailure {
                    resource: None,
                    reason: TaskError::Aborted(e.to_string()),
                })
            }
        })
    }
}

impl Drop for OutletPool {
    fn drop(&mut self) {
        let abandoned = self.running.len() + self.pending.len();
        if abandoned > 0 {
            warn!(outlet = %self.outlet, abandoned, "Pool released with unfinished tasks");
        } else {
            debug!(outlet = %self.outlet, "Pool released");
        }
    }
}

//! Sequential batch runner
//!
//! Walks an ordered list of work items and performs one asynchronous
//! operation per item, with a bounded number of operations in flight
//! (one by default). Every stage of the pipeline is a run of this
//! executor with a different per-item operation.
//!
//! Guarantees of a single [`BatchRunner::run_with_skip`] call:
//!
//! - Items are started in input order, and at most
//!   [`RunnerConfig::concurrency`] operations are outstanding at once.
//! - `skip` is evaluated synchronously right before an item would be
//!   started. A present value becomes the item's output and the
//!   operation is never invoked for that item.
//! - The operation is invoked at most once per item. A failed or timed
//!   out item is recorded in [`BatchResult::failures`] and the run moves
//!   on to the next item.
//! - The returned future resolves only once every item has produced an
//!   output, a recorded failure or (after cancellation) has been listed
//!   as not started. Outputs are returned in input order regardless of
//!   completion order.
//!
//! Cancellation drains gracefully: once the token fires no further item is
//! started, operations already in flight are awaited and recorded, and the
//! remaining identifiers are reported in [`BatchResult::not_started`].
//!
//! ```
//! use waldo_ingest::runner::{BatchRunner, RunnerConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let runner = BatchRunner::new("double", RunnerConfig::default()).unwrap();
//! let result = runner
//!     .run(vec![1, 2, 3], |n: i32| async move {
//!         if n == 2 { Err("two is unlucky") } else { Ok(n * 2) }
//!     })
//!     .await;
//!
//! assert_eq!(result.outputs, vec![2, 6]);
//! assert_eq!(result.failures[0].item, "2");
//! # }
//! ```

use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RunnerUsageError;
use crate::summary::StageSummary;

/// Default number of operations a stage keeps in flight.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Execution policy for one runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Maximum operations in flight at any time
    pub concurrency: usize,

    /// Per-item deadline; an expired item is recorded as a failure
    pub item_timeout: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            item_timeout: None,
        }
    }
}

impl RunnerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_item_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), RunnerUsageError> {
        if self.concurrency == 0 {
            return Err(RunnerUsageError::ZeroConcurrency);
        }
        if let Some(timeout) = self.item_timeout {
            if timeout.is_zero() {
                return Err(RunnerUsageError::ZeroTimeout(timeout));
            }
        }
        Ok(())
    }
}

/// Progress event emitted each time an item settles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageProgress<'a> {
    pub stage: &'a str,
    pub attempted: usize,
    pub total: usize,
}

/// Callback receiving [`StageProgress`] events
pub type ProgressObserver = Arc<dyn Fn(&StageProgress<'_>) + Send + Sync>;

/// Why an item did not produce an output
#[derive(Debug)]
pub enum ItemError<E> {
    /// The operation returned an error
    Failed(E),
    /// The operation did not finish within the per-item timeout
    TimedOut(Duration),
}

impl<E> ItemError<E> {
    pub fn as_failure(&self) -> Option<&E> {
        match self {
            ItemError::Failed(err) => Some(err),
            ItemError::TimedOut(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ItemError::TimedOut(_))
    }
}

impl<E: fmt::Display> fmt::Display for ItemError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemError::Failed(err) => err.fmt(f),
            ItemError::TimedOut(limit) => write!(f, "timed out after {:?}", limit),
        }
    }
}

impl<E> std::error::Error for ItemError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ItemError::Failed(err) => Some(err),
            ItemError::TimedOut(_) => None,
        }
    }
}

/// A recorded per-item failure
#[derive(Debug)]
pub struct ItemFailure<E> {
    /// Position of the item in the input sequence
    pub index: usize,
    /// Display form of the item
    pub item: String,
    pub error: ItemError<E>,
}

/// Outcome of one completed stage
#[derive(Debug)]
pub struct BatchResult<O, E> {
    pub stage: String,
    pub total: usize,
    /// Outputs of successful and skipped items, in input order
    pub outputs: Vec<O>,
    /// Failed items, in input order
    pub failures: Vec<ItemFailure<E>>,
    /// Items whose operation succeeded
    pub succeeded: usize,
    /// Items satisfied by `skip`
    pub skipped: usize,
    /// Items never started because the run was cancelled
    pub not_started: Vec<String>,
}

impl<O, E> BatchResult<O, E> {
    fn empty(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            total: 0,
            outputs: Vec::new(),
            failures: Vec::new(),
            succeeded: 0,
            skipped: 0,
            not_started: Vec::new(),
        }
    }

    /// Items that produced an output or a recorded failure
    pub fn attempted(&self) -> usize {
        self.succeeded + self.skipped + self.failures.len()
    }

    /// True when every item was attempted (no cancellation cut-off)
    pub fn is_complete(&self) -> bool {
        self.not_started.is_empty()
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.item.as_str())
    }

    pub fn summary(&self) -> StageSummary {
        StageSummary {
            stage: self.stage.clone(),
            total: self.total,
            succeeded: self.succeeded,
            skipped: self.skipped,
            failed: self.failures.len(),
            not_started: self.not_started.len(),
        }
    }

    pub fn into_outputs(self) -> Vec<O> {
        self.outputs
    }
}

enum Settled<O, E> {
    Skipped(O),
    Completed(O),
    Failed(ItemError<E>),
}

/// Per-invocation state; never shared between runs
struct RunState<O, E> {
    slots: Vec<Option<(String, Settled<O, E>)>>,
    attempted: usize,
}

impl<O, E> RunState<O, E> {
    fn new(total: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(total).collect(),
            attempted: 0,
        }
    }

    fn finish(self, stage: &str, not_started: Vec<String>) -> BatchResult<O, E> {
        let mut result = BatchResult::empty(stage);
        result.total = self.slots.len();
        result.not_started = not_started;

        for (index, slot) in self.slots.into_iter().enumerate() {
            match slot {
                Some((_, Settled::Skipped(output))) => {
                    result.skipped += 1;
                    result.outputs.push(output);
                },
                Some((_, Settled::Completed(output))) => {
                    result.succeeded += 1;
                    result.outputs.push(output);
                },
                Some((item, Settled::Failed(error))) => {
                    result.failures.push(ItemFailure { index, item, error });
                },
                None => {},
            }
        }

        result
    }
}

/// Single-stage executor with a bounded in-flight count
pub struct BatchRunner {
    stage: String,
    config: RunnerConfig,
    cancel: CancellationToken,
    observer: Option<ProgressObserver>,
}

impl fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRunner")
            .field("stage", &self.stage)
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl BatchRunner {
    /// Create a runner for the named stage.
    ///
    /// Fails with [`RunnerUsageError`] when `config` cannot be honoured; this
    /// is the only way a runner fails.
    pub fn new(stage: impl Into<String>, config: RunnerConfig) -> Result<Self, RunnerUsageError> {
        config.validate()?;
        Ok(Self {
            stage: stage.into(),
            config,
            cancel: CancellationToken::new(),
            observer: None,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn config(&self) -> RunnerConfig {
        self.config
    }

    /// Run `operation` over every item with no skip check.
    pub async fn run<I, O, E, F, Fut>(&self, items: Vec<I>, operation: F) -> BatchResult<O, E>
    where
        I: fmt::Display,
        E: fmt::Display,
        F: FnMut(I) -> Fut,
        Fut: Future<Output = Result<O, E>>,
    {
        self.run_with_skip(items, |_: &I| None, operation).await
    }

    /// Run `operation` over every item for which `skip` returns `None`.
    pub async fn run_with_skip<I, O, E, S, F, Fut>(
        &self,
        items: Vec<I>,
        mut skip: S,
        mut operation: F,
    ) -> BatchResult<O, E>
    where
        I: fmt::Display,
        E: fmt::Display,
        S: FnMut(&I) -> Option<O>,
        F: FnMut(I) -> Fut,
        Fut: Future<Output = Result<O, E>>,
    {
        let total = items.len();
        if total == 0 {
            info!(stage = %self.stage, "No items to process");
            return BatchResult::empty(&self.stage);
        }

        info!(
            stage = %self.stage,
            total,
            concurrency = self.config.concurrency,
            "Starting stage"
        );

        let mut state = RunState::new(total);
        let mut pending = items.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < self.config.concurrency && !self.cancel.is_cancelled() {
                let Some((index, item)) = pending.next() else {
                    break;
                };
                let id = item.to_string();

                if let Some(output) = skip(&item) {
                    debug!(stage = %self.stage, item = %id, "Result already present, skipping");
                    self.settle(&mut state, index, id, Settled::Skipped(output));
                    continue;
                }

                debug!(stage = %self.stage, item = %id, "Starting item");
                in_flight.push(self.attempt(index, id, operation(item)));
            }

            let Some((index, id, result)) = in_flight.next().await else {
                break;
            };
            let settled = match result {
                Ok(output) => Settled::Completed(output),
                Err(error) => Settled::Failed(error),
            };
            self.settle(&mut state, index, id, settled);
        }

        let not_started: Vec<String> = pending.map(|(_, item)| item.to_string()).collect();
        if !not_started.is_empty() {
            warn!(
                stage = %self.stage,
                not_started = not_started.len(),
                "Stage cancelled before every item was started"
            );
        }

        let result = state.finish(&self.stage, not_started);
        info!(
            stage = %self.stage,
            succeeded = result.succeeded,
            skipped = result.skipped,
            failed = result.failures.len(),
            not_started = result.not_started.len(),
            "Stage finished"
        );
        result
    }

    /// Wrap one operation with the per-item deadline.
    fn attempt<O, E, Fut>(
        &self,
        index: usize,
        id: String,
        operation: Fut,
    ) -> impl Future<Output = (usize, String, Result<O, ItemError<E>>)>
    where
        Fut: Future<Output = Result<O, E>>,
    {
        let limit = self.config.item_timeout;
        async move {
            let result = match limit {
                Some(limit) => match tokio::time::timeout(limit, operation).await {
                    Ok(result) => result.map_err(ItemError::Failed),
                    Err(_) => Err(ItemError::TimedOut(limit)),
                },
                None => operation.await.map_err(ItemError::Failed),
            };
            (index, id, result)
        }
    }

    fn settle<O, E: fmt::Display>(
        &self,
        state: &mut RunState<O, E>,
        index: usize,
        id: String,
        settled: Settled<O, E>,
    ) {
        state.attempted += 1;
        let total = state.slots.len();

        if let Settled::Failed(error) = &settled {
            warn!(stage = %self.stage, item = %id, error = %error, "Item failed, continuing");
        }
        info!(
            stage = %self.stage,
            attempted = state.attempted,
            total,
            "Stage progress"
        );
        if let Some(observer) = &self.observer {
            observer(&StageProgress {
                stage: &self.stage,
                attempted: state.attempted,
                total,
            });
        }

        state.slots[index] = Some((id, settled));
    }
}

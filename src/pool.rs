//! Fixed-size pool of lookup workers.
//!
//! Every worker pulls identifiers from a shared [`Feed`], asks the
//! [`Lookup`] collaborator for the amount owed and hands the outcome to a
//! [`ResultSink`]. Lookup failures are recorded as `Error` items and never
//! stop the pool. Cancellation stops workers at their next pull; a lookup
//! already in flight runs to completion and its outcome is still recorded.

use crate::config::RunConfig;
use crate::error::Result;
use crate::lookup::Lookup;
use crate::model::{Completion, PlateKey, State};
use crate::queue::WorkQueue;
use crate::sink::ResultSink;
use crate::telemetry::metrics;
use crate::telemetry::work::{record_outcome, start_lookup_span};
use opentelemetry::KeyValue;
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Where workers take identifiers from.
pub enum Feed {
    /// Drain pending items of the ledger.
    Queue(Arc<WorkQueue>),
    /// Identifiers arriving on a channel.
    Stream(Mutex<mpsc::Receiver<String>>),
    /// A finite, explicit list.
    List(std::sync::Mutex<VecDeque<String>>),
}

impl Feed {
    pub fn queue(queue: Arc<WorkQueue>) -> Self {
        Feed::Queue(queue)
    }

    pub fn stream(rx: mpsc::Receiver<String>) -> Self {
        Feed::Stream(Mutex::new(rx))
    }

    pub fn list(identifiers: impl IntoIterator<Item = String>) -> Self {
        Feed::List(std::sync::Mutex::new(identifiers.into_iter().collect()))
    }

    /// Next identifier, `None` once the feed is exhausted.
    async fn pull(&self) -> Result<Option<String>> {
        match self {
            Feed::Queue(queue) => queue.next().await,
            Feed::Stream(rx) => Ok(rx.lock().await.recv().await),
            Feed::List(list) => Ok(list
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()),
        }
    }
}

/// Totals across all workers of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub done: u64,
    pub error: u64,
    /// Failed pulls from the feed (each followed by a retry delay).
    pub feed_errors: u64,
    /// Workers that stopped because they reached the work limit.
    pub limited: usize,
    pub cancelled: bool,
}

impl PoolReport {
    pub fn attempted(&self) -> u64 {
        self.done + self.error
    }

    fn merge(&mut self, worker: PoolReport) {
        self.done += worker.done;
        self.error += worker.error;
        self.feed_errors += worker.feed_errors;
        self.limited += worker.limited;
    }
}

pub struct WorkerPool {
    workers: usize,
    jurisdiction: String,
    work_limit: Option<u64>,
    retry_delay: Duration,
}

struct Shared {
    feed: Feed,
    lookup: Arc<dyn Lookup>,
    sink: Arc<dyn ResultSink>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            jurisdiction: config.jurisdiction.clone(),
            work_limit: config.work_limit.map(|n| n as u64),
            retry_delay: config.retry_delay(),
        }
    }

    /// Run every worker until the feed is exhausted, each worker reaches the
    /// work limit, or `cancel` fires.
    ///
    /// Completions may still be buffered in `sink` when this returns; flush
    /// it afterwards.
    pub async fn run(
        &self,
        feed: Feed,
        lookup: Arc<dyn Lookup>,
        sink: Arc<dyn ResultSink>,
        cancel: CancellationToken,
    ) -> PoolReport {
        let shared = Arc::new(Shared {
            feed,
            lookup,
            sink,
            cancel,
        });

        info!(
            workers = self.workers,
            jurisdiction = %self.jurisdiction,
            work_limit = ?self.work_limit,
            sink = shared.sink.name(),
            "worker pool started"
        );

        let mut set = JoinSet::new();
        for worker in 0..self.workers {
            let shared = Arc::clone(&shared);
            let jurisdiction = self.jurisdiction.clone();
            let work_limit = self.work_limit;
            let retry_delay = self.retry_delay;
            set.spawn(async move {
                work(worker, &shared, jurisdiction, work_limit, retry_delay).await
            });
        }

        let mut report = PoolReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(worker) => report.merge(worker),
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }
        report.cancelled = shared.cancel.is_cancelled();

        info!(
            done = report.done,
            error = report.error,
            feed_errors = report.feed_errors,
            cancelled = report.cancelled,
            "worker pool finished"
        );
        report
    }
}

async fn work(
    worker: usize,
    shared: &Shared,
    jurisdiction: String,
    work_limit: Option<u64>,
    retry_delay: Duration,
) -> PoolReport {
    let mut report = PoolReport::default();
    loop {
        if work_limit.is_some_and(|limit| report.done >= limit) {
            debug!(worker, done = report.done, "work limit reached");
            report.limited = 1;
            break;
        }

        let identifier = match shared.cancel.run_until_cancelled(shared.feed.pull()).await {
            None => break,
            Some(Ok(Some(identifier))) => identifier,
            Some(Ok(None)) => break,
            Some(Err(e)) => {
                report.feed_errors += 1;
                warn!(worker, error = %e, "failed to fetch work, retrying");
                if shared
                    .cancel
                    .run_until_cancelled(tokio::time::sleep(retry_delay))
                    .await
                    .is_none()
                {
                    break;
                }
                continue;
            }
        };

        let key = PlateKey::new(identifier, jurisdiction.as_str());
        let span = start_lookup_span(worker, &key);
        let state = attempt(shared, key).instrument(span.clone()).await;
        record_outcome(&span, state);
        match state {
            State::Done => report.done += 1,
            _ => report.error += 1,
        }
    }
    report
}

/// One lookup, its outcome handed to the sink. Returns the resulting state.
async fn attempt(shared: &Shared, key: PlateKey) -> State {
    let started = Instant::now();
    let result = shared
        .lookup
        .total_owed(&key.identifier, &key.jurisdiction)
        .await;
    metrics::lookup_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &[]);

    let completion = match result {
        Ok(amount) => {
            debug!(%amount, "lookup done");
            Completion::done(key, amount)
        }
        Err(e) => {
            warn!(plate = %key, error = %e, "lookup failed");
            Completion::error(key, e.to_string())
        }
    };
    let state = completion.outcome.state();
    metrics::lookups().add(1, &[KeyValue::new("result", state.as_str())]);
    shared.sink.record(completion).await;
    state
}

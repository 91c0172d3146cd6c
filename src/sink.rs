//! Where workers send lookup outcomes.
//!
//! [`DirectSink`] writes every completion on its own, fire and forget.
//! [`BatchedSink`] routes completions through a [`Batcher`] so they land in
//! the ledger as one transaction per `tx_size` records. Both must be flushed
//! once the pool has stopped. A sink built with [`draining`] releases each
//! identifier back to its [`WorkQueue`] once the write has finished.

use crate::batch::{BatchWriter, Batcher};
use crate::config::RunConfig;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::model::{Completion, PlateKey};
use crate::queue::WorkQueue;
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// What a sink did with the completions it received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub received: u64,
    /// Items moved out of pending.
    pub applied: u64,
    /// Completions for items that were no longer pending.
    pub stale: u64,
    /// Completions whose write failed.
    pub failed: u64,
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Hand over one completion. Never blocks on the ledger.
    async fn record(&self, completion: Completion);

    /// Wait until every completion received so far has been written.
    async fn flush(&self) -> Result<SinkReport>;
}

/// Pick the sink a run asks for: batched when `tx_size > 0`.
pub fn from_config(ledger: Arc<dyn Ledger>, config: &RunConfig) -> Arc<dyn ResultSink> {
    build(ledger, config, None)
}

/// Like [`from_config`], for results of items handed out by `queue`.
pub fn draining(
    ledger: Arc<dyn Ledger>,
    config: &RunConfig,
    queue: Arc<WorkQueue>,
) -> Arc<dyn ResultSink> {
    build(ledger, config, Some(queue))
}

fn build(
    ledger: Arc<dyn Ledger>,
    config: &RunConfig,
    queue: Option<Arc<WorkQueue>>,
) -> Arc<dyn ResultSink> {
    match (config.batch_size(), queue) {
        (Some(size), Some(queue)) => Arc::new(BatchedSink::new(ledger, size).releasing(queue)),
        (Some(size), None) => Arc::new(BatchedSink::new(ledger, size)),
        (None, Some(queue)) => Arc::new(DirectSink::new(ledger).releasing(queue)),
        (None, None) => Arc::new(DirectSink::new(ledger)),
    }
}

fn release(queue: Option<&WorkQueue>, key: &PlateKey) {
    if let Some(queue) = queue {
        queue.release(&key.identifier);
    }
}

// ---------------------------------------------------------------------------
// Direct
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DirectCounters {
    received: AtomicU64,
    applied: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
}

pub struct DirectSink {
    ledger: Arc<dyn Ledger>,
    writes: TaskTracker,
    counters: Arc<DirectCounters>,
    queue: Option<Arc<WorkQueue>>,
}

impl DirectSink {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            writes: TaskTracker::new(),
            counters: Arc::new(DirectCounters::default()),
            queue: None,
        }
    }

    /// Release every written identifier back to `queue`.
    pub fn releasing(mut self, queue: Arc<WorkQueue>) -> Self {
        self.queue = Some(queue);
        self
    }
}

#[async_trait]
impl ResultSink for DirectSink {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn record(&self, completion: Completion) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let ledger = Arc::clone(&self.ledger);
        let counters = Arc::clone(&self.counters);
        let queue = self.queue.clone();
        self.writes.spawn(async move {
            let result = match ledger.record(&completion).await {
                Ok(true) => {
                    counters.applied.fetch_add(1, Ordering::Relaxed);
                    "applied"
                }
                Ok(false) => {
                    counters.stale.fetch_add(1, Ordering::Relaxed);
                    debug!(plate = %completion.key, "item no longer pending, result dropped");
                    "stale"
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(plate = %completion.key, error = %e, "update error");
                    "failed"
                }
            };
            release(queue.as_deref(), &completion.key);
            metrics::ledger_writes().add(
                1,
                &[KeyValue::new("sink", "direct"), KeyValue::new("result", result)],
            );
        });
    }

    async fn flush(&self) -> Result<SinkReport> {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
        Ok(SinkReport {
            received: self.counters.received.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        })
    }
}

// ---------------------------------------------------------------------------
// Batched
// ---------------------------------------------------------------------------

/// Applies a batch of completions with [`Ledger::record_many`].
pub struct CompletionWriter {
    ledger: Arc<dyn Ledger>,
    queue: OnceLock<Arc<WorkQueue>>,
}

impl CompletionWriter {
    fn release_all(&self, batch: &[Completion]) {
        for completion in batch {
            release(self.queue.get().map(Arc::as_ref), &completion.key);
        }
    }
}

#[async_trait]
impl BatchWriter for CompletionWriter {
    type Item = Completion;

    fn name(&self) -> &'static str {
        "batched"
    }

    async fn write(&self, batch: &[Completion]) -> Result<u64> {
        let applied = self.ledger.record_many(batch).await?;
        let stale = (batch.len() as u64).saturating_sub(applied);
        let writes = metrics::ledger_writes();
        writes.add(
            applied,
            &[KeyValue::new("sink", "batched"), KeyValue::new("result", "applied")],
        );
        if stale > 0 {
            writes.add(
                stale,
                &[KeyValue::new("sink", "batched"), KeyValue::new("result", "stale")],
            );
        }
        self.release_all(batch);
        Ok(applied)
    }

    fn abandoned(&self, batch: &[Completion]) {
        self.release_all(batch);
    }
}

pub struct BatchedSink {
    batcher: Batcher<CompletionWriter>,
    received: AtomicU64,
}

impl BatchedSink {
    pub fn new(ledger: Arc<dyn Ledger>, tx_size: NonZeroUsize) -> Self {
        Self {
            batcher: Batcher::new(
                CompletionWriter {
                    ledger,
                    queue: OnceLock::new(),
                },
                tx_size,
            ),
            received: AtomicU64::new(0),
        }
    }

    /// Release every written identifier back to `queue`. Only the first call
    /// takes effect.
    pub fn releasing(self, queue: Arc<WorkQueue>) -> Self {
        let _ = self.batcher.writer().queue.set(queue);
        self
    }

    /// Completions buffered and not yet handed to a transaction.
    pub fn buffered(&self) -> usize {
        self.batcher.buffered()
    }
}

#[async_trait]
impl ResultSink for BatchedSink {
    fn name(&self) -> &'static str {
        "batched"
    }

    async fn record(&self, completion: Completion) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.batcher.push(completion);
    }

    async fn flush(&self) -> Result<SinkReport> {
        let report = self.batcher.flush().await?;
        Ok(SinkReport {
            received: self.received.load(Ordering::Relaxed),
            applied: report.applied,
            stale: report.records.saturating_sub(report.applied),
            failed: report.failed,
        })
    }
}

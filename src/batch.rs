//! Threshold-triggered transactional batching.
//!
//! A [`Batcher`] buffers records under a short std mutex. When the buffer
//! reaches the threshold it is swapped for an empty one inside the same
//! critical section and the full batch is written on a background task, so
//! concurrent `push` calls never interleave with a flush and no record is
//! written twice. [`Batcher::flush`] writes the remainder and waits for every
//! background write; callers must invoke it once producers are done.

use crate::error::{Error, Result};
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// Applies one batch as a single transaction.
#[async_trait]
pub trait BatchWriter: Send + Sync + 'static {
    type Item: Send + Sync + 'static;

    /// Label for logs and metrics.
    fn name(&self) -> &'static str;

    /// Write the whole batch atomically. Returns the number of records applied.
    async fn write(&self, batch: &[Self::Item]) -> Result<u64>;

    /// Called once for a batch that failed and will not be retried.
    fn abandoned(&self, _batch: &[Self::Item]) {}
}

/// How often a failed batch is retried wholesale.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Totals across every batch written so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Transactions committed.
    pub batches: u64,
    /// Records in committed transactions.
    pub records: u64,
    /// Records the writer reported as applied.
    pub applied: u64,
    /// Records in batches that exhausted their retries.
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    records: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
}

pub struct Batcher<W: BatchWriter> {
    writer: Arc<W>,
    threshold: usize,
    pending: Mutex<Vec<W::Item>>,
    flushes: TaskTracker,
    counters: Arc<Counters>,
    retry: RetryPolicy,
}

impl<W: BatchWriter> Batcher<W> {
    pub fn new(writer: W, threshold: NonZeroUsize) -> Self {
        Self {
            writer: Arc::new(writer),
            threshold: threshold.get(),
            pending: Mutex::new(Vec::with_capacity(threshold.get())),
            flushes: TaskTracker::new(),
            counters: Arc::new(Counters::default()),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Buffer one record, starting a background write if the threshold is reached.
    pub fn push(&self, item: W::Item) {
        let full = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.push(item);
            (pending.len() >= self.threshold)
                .then(|| std::mem::replace(&mut *pending, Vec::with_capacity(self.threshold)))
        };

        if let Some(batch) = full {
            let writer = Arc::clone(&self.writer);
            let counters = Arc::clone(&self.counters);
            let retry = self.retry;
            self.flushes.spawn(async move {
                // Failures are logged and counted inside write_batch.
                let _ = write_batch(&*writer, batch, &counters, retry).await;
            });
        }
    }

    /// Records buffered but not yet handed to a write.
    pub fn buffered(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Write whatever is buffered and wait for every background write.
    ///
    /// Returns the error of the final write if it failed; background failures
    /// show up in [`BatchReport::failed`].
    pub async fn flush(&self) -> Result<BatchReport> {
        let rest = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        let result = if rest.is_empty() {
            Ok(0)
        } else {
            write_batch(&*self.writer, rest, &self.counters, self.retry).await
        };

        self.flushes.close();
        self.flushes.wait().await;
        self.flushes.reopen();

        result?;
        Ok(self.report())
    }

    pub fn report(&self) -> BatchReport {
        BatchReport {
            batches: self.counters.batches.load(Ordering::Relaxed),
            records: self.counters.records.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// Write one batch, retrying store failures wholesale.
async fn write_batch<W: BatchWriter>(
    writer: &W,
    batch: Vec<W::Item>,
    counters: &Counters,
    retry: RetryPolicy,
) -> Result<u64> {
    let len = batch.len() as u64;
    let mut attempt = 1;
    loop {
        match writer.write(&batch).await {
            Ok(applied) => {
                counters.batches.fetch_add(1, Ordering::Relaxed);
                counters.records.fetch_add(len, Ordering::Relaxed);
                counters.applied.fetch_add(applied, Ordering::Relaxed);
                metrics::batch_size().record(len, &[KeyValue::new("sink", writer.name())]);
                debug!(sink = writer.name(), records = len, applied, "batch committed");
                return Ok(applied);
            }
            Err(e @ Error::Store(_)) if attempt < retry.attempts => {
                warn!(
                    sink = writer.name(),
                    records = len,
                    attempt,
                    error = %e,
                    "batch write failed, retrying whole batch"
                );
                tokio::time::sleep(retry.backoff * 2u32.saturating_pow(attempt - 1)).await;
                attempt += 1;
            }
            Err(e) => {
                counters.failed.fetch_add(len, Ordering::Relaxed);
                metrics::ledger_writes().add(
                    len,
                    &[
                        KeyValue::new("sink", writer.name()),
                        KeyValue::new("result", "failed"),
                    ],
                );
                error!(sink = writer.name(), records = len, error = %e, "batch write failed");
                writer.abandoned(&batch);
                return Err(e);
            }
        }
    }
}

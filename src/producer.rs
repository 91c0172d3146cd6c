//! The add path: new identifiers become pending ledger items.
//!
//! [`Producer`] binds the ledger to one jurisdiction and tag. Its three write
//! modes map onto the ledger's insert operations; [`Producer::ingest`] drains
//! a generator channel with a fixed number of concurrent tasks, either adding
//! items one by one or through a [`Batcher`] of `tx_size` records.

use crate::batch::{BatchWriter, Batcher};
use crate::config::RunConfig;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::model::{AddSummary, NewPlate, PlateKey, State};
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct Producer {
    ledger: Arc<dyn Ledger>,
    jurisdiction: String,
    tag: Option<String>,
}

/// Outcome of one ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Identifiers taken off the channel.
    pub received: u64,
    pub added: u64,
    pub existed: u64,
    /// Identifiers only logged because of a dry run.
    pub planned: u64,
    /// Identifiers whose insert failed.
    pub failed: u64,
    pub cancelled: bool,
}

impl IngestReport {
    /// Identifiers that reached the ledger, new or already present.
    pub fn processed(&self) -> u64 {
        self.added + self.existed
    }

    /// Processed identifiers per second over `elapsed`.
    pub fn rate(&self, elapsed: Duration) -> f64 {
        self.processed() as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    }
}

#[derive(Default)]
struct IngestCounters {
    received: AtomicU64,
    added: AtomicU64,
    existed: AtomicU64,
    planned: AtomicU64,
    failed: AtomicU64,
}

impl IngestCounters {
    fn added(&self, n: u64) {
        self.added.fetch_add(n, Ordering::Relaxed);
        metrics::plates_added().add(n, &[KeyValue::new("result", "added")]);
    }

    fn existed(&self, n: u64) {
        self.existed.fetch_add(n, Ordering::Relaxed);
        metrics::plates_added().add(n, &[KeyValue::new("result", "existed")]);
    }

    fn snapshot(&self) -> IngestReport {
        IngestReport {
            received: self.received.load(Ordering::Relaxed),
            added: self.added.load(Ordering::Relaxed),
            existed: self.existed.load(Ordering::Relaxed),
            planned: self.planned.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: false,
        }
    }
}

impl Producer {
    pub fn new(ledger: Arc<dyn Ledger>, config: &RunConfig) -> Self {
        Self {
            ledger,
            jurisdiction: config.jurisdiction.clone(),
            tag: config.tag.clone(),
        }
    }

    fn plate(&self, identifier: &str) -> NewPlate {
        NewPlate {
            key: PlateKey::new(identifier, self.jurisdiction.as_str()),
            tag: self.tag.clone(),
        }
    }

    /// Add one pending item. Returns `true` if it already existed.
    pub async fn add_one(&self, identifier: &str) -> Result<bool> {
        self.ledger.add_one(&self.plate(identifier)).await
    }

    /// Add every identifier in one transaction, all or nothing.
    pub async fn add_many_transactional(&self, identifiers: &[String]) -> Result<AddSummary> {
        let plates: Vec<NewPlate> = identifiers.iter().map(|id| self.plate(id)).collect();
        self.ledger.add_many(&plates).await
    }

    /// Bulk insert input known not to be in the ledger yet.
    pub async fn add_many_skip_existing_check(&self, identifiers: &[String]) -> Result<u64> {
        let plates: Vec<NewPlate> = identifiers.iter().map(|id| self.plate(id)).collect();
        self.ledger.add_many_unchecked(&plates).await
    }

    /// Snapshot of identifiers already done in this jurisdiction, taken once
    /// when `config.dedup_done` asks for it. Feed it to [`crate::generator::spawn`].
    pub async fn done_exclusions(&self, config: &RunConfig) -> Result<Option<HashSet<String>>> {
        if !config.dedup_done {
            return Ok(None);
        }
        let done = self
            .ledger
            .identifiers_in_state(&self.jurisdiction, State::Done)
            .await?;
        info!(jurisdiction = %self.jurisdiction, done = done.len(), "loaded done snapshot");
        Ok(Some(done))
    }

    /// Drain `rx` into the ledger with `config.workers` concurrent tasks.
    ///
    /// Per-item failures are logged and counted, never returned. Cancellation
    /// stops the tasks at their next receive; buffered records are still
    /// flushed.
    pub async fn ingest(
        &self,
        rx: mpsc::Receiver<String>,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<IngestReport> {
        let counters = Arc::new(IngestCounters::default());
        let rx = Arc::new(Mutex::new(rx));
        let batcher = match config.batch_size() {
            Some(size) if !config.dry_run => Some(Arc::new(Batcher::new(
                AddWriter {
                    ledger: Arc::clone(&self.ledger),
                    unchecked: config.skip_existing_check,
                    counters: Arc::clone(&counters),
                },
                size,
            ))),
            _ => None,
        };

        info!(
            jurisdiction = %self.jurisdiction,
            workers = config.workers,
            tx_size = config.tx_size,
            dry_run = config.dry_run,
            skip_existing_check = config.skip_existing_check,
            "ingest started"
        );

        let finished = CancellationToken::new();
        let progress = tokio::spawn(report_progress(
            Arc::clone(&counters),
            config.progress_interval(),
            finished.clone(),
        ));

        let mut set = JoinSet::new();
        for _ in 0..config.workers.max(1) {
            let producer = self.clone();
            let rx = Arc::clone(&rx);
            let counters = Arc::clone(&counters);
            let batcher = batcher.clone();
            let cancel = cancel.clone();
            let dry_run = config.dry_run;
            set.spawn(async move {
                loop {
                    let next = cancel
                        .run_until_cancelled(async { rx.lock().await.recv().await })
                        .await;
                    let Some(Some(identifier)) = next else { break };
                    counters.received.fetch_add(1, Ordering::Relaxed);

                    if dry_run {
                        info!(plate = %identifier, jurisdiction = %producer.jurisdiction, "dry run, would add");
                        counters.planned.fetch_add(1, Ordering::Relaxed);
                        metrics::plates_added().add(1, &[KeyValue::new("result", "dry_run")]);
                    } else if let Some(batcher) = &batcher {
                        batcher.push(producer.plate(&identifier));
                    } else {
                        match producer.add_one(&identifier).await {
                            Ok(true) => counters.existed(1),
                            Ok(false) => counters.added(1),
                            Err(e) => {
                                counters.failed.fetch_add(1, Ordering::Relaxed);
                                warn!(plate = %identifier, error = %e, "add failed");
                            }
                        }
                    }
                }
            });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "ingest task failed");
            }
        }

        if let Some(batcher) = &batcher {
            if let Err(e) = batcher.flush().await {
                warn!(error = %e, "final add batch failed");
            }
            counters
                .failed
                .fetch_add(batcher.report().failed, Ordering::Relaxed);
        }

        finished.cancel();
        if let Err(e) = progress.await {
            debug!(error = %e, "progress reporter ended abnormally");
        }

        let mut report = counters.snapshot();
        report.cancelled = cancel.is_cancelled();
        info!(
            received = report.received,
            added = report.added,
            existed = report.existed,
            planned = report.planned,
            failed = report.failed,
            cancelled = report.cancelled,
            "ingest finished"
        );
        Ok(report)
    }
}

/// Inserts a batch of new plates, with or without the existence check.
struct AddWriter {
    ledger: Arc<dyn Ledger>,
    unchecked: bool,
    counters: Arc<IngestCounters>,
}

#[async_trait]
impl BatchWriter for AddWriter {
    type Item = NewPlate;

    fn name(&self) -> &'static str {
        "adds"
    }

    async fn write(&self, batch: &[NewPlate]) -> Result<u64> {
        if self.unchecked {
            let added = self.ledger.add_many_unchecked(batch).await?;
            self.counters.added(added);
            return Ok(added);
        }
        let summary = self.ledger.add_many(batch).await?;
        self.counters.added(summary.added);
        self.counters.existed(summary.existed);
        Ok(summary.added)
    }
}

/// Log running totals, per-interval deltas and the add rate until `finished` fires.
async fn report_progress(
    counters: Arc<IngestCounters>,
    every: Duration,
    finished: CancellationToken,
) {
    let started = Instant::now();
    let mut last = counters.snapshot();
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    while finished.run_until_cancelled(ticker.tick()).await.is_some() {
        let now = counters.snapshot();
        info!(
            added = now.added,
            existed = now.existed,
            added_delta = now.added - last.added,
            existed_delta = now.existed - last.existed,
            rate = format!("{:.1}/s", now.rate(started.elapsed())),
            "ingest progress"
        );
        last = now;
    }
}

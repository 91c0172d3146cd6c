//! Prefetching cursor over pending ledger items.
//!
//! Workers share one [`WorkQueue`]. When its buffer runs dry the next caller
//! refills it from the ledger while holding the queue lock, so refills are
//! serialized and each page is fetched once. An identifier stays in flight
//! from the refill that buffers it until [`WorkQueue::release`] reports its
//! completion written; in-flight identifiers are never buffered again. Items
//! are not reserved in the ledger: another process draining the same
//! jurisdiction may hand out the same identifier.

use crate::config::RunConfig;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct Prefetch {
    buf: VecDeque<String>,
    /// Keyset cursor: last identifier of the previous page.
    after: Option<String>,
    dispensed: usize,
}

pub struct WorkQueue {
    ledger: Arc<dyn Ledger>,
    jurisdiction: String,
    batch: usize,
    state: Mutex<Prefetch>,
    /// Buffered or handed out, completion not yet written.
    in_flight: std::sync::Mutex<HashSet<String>>,
}

impl WorkQueue {
    /// Queue over `config.jurisdiction`, fetching `prefetch_factor * workers` per refill.
    pub fn new(ledger: Arc<dyn Ledger>, config: &RunConfig) -> Self {
        Self::with_batch(ledger, config.jurisdiction.clone(), config.prefetch())
    }

    pub fn with_batch(ledger: Arc<dyn Ledger>, jurisdiction: impl Into<String>, batch: usize) -> Self {
        Self {
            ledger,
            jurisdiction: jurisdiction.into(),
            batch: batch.max(1),
            state: Mutex::new(Prefetch::default()),
            in_flight: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// Next pending identifier, or `None` once every pending item of the
    /// jurisdiction is already in flight.
    pub async fn next(&self) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        if let Some(id) = state.buf.pop_front() {
            state.dispensed += 1;
            return Ok(Some(id));
        }

        match self.refill(&mut state).await {
            Ok(0) => {
                metrics::queue_refills().add(1, &[KeyValue::new("result", "empty")]);
                Ok(None)
            }
            Ok(n) => {
                metrics::queue_refills().add(1, &[KeyValue::new("result", "items")]);
                debug!(jurisdiction = %self.jurisdiction, items = n, "work queue refilled");
                state.dispensed += 1;
                Ok(state.buf.pop_front())
            }
            Err(e) => {
                metrics::queue_refills().add(1, &[KeyValue::new("result", "error")]);
                Err(e)
            }
        }
    }

    /// The completion for `identifier` has been written, applied or not. A
    /// later refill may hand it out again if the ledger still lists it pending.
    pub fn release(&self, identifier: &str) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identifier);
    }

    /// Identifiers handed out so far.
    pub async fn dispensed(&self) -> usize {
        self.state.lock().await.dispensed
    }

    /// Identifiers buffered or handed out and not yet released.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Page forward until a page yields items not in flight, wrapping to the
    /// start of the keyspace at most once. Returns the number buffered.
    async fn refill(&self, state: &mut Prefetch) -> Result<usize> {
        let Prefetch { buf, after, .. } = state;
        let mut wrapped = after.is_none();
        loop {
            let page = self
                .ledger
                .fetch_pending(&self.jurisdiction, after.as_deref(), self.batch)
                .await?;
            let reached_end = page.len() < self.batch;
            if let Some(last) = page.last() {
                *after = Some(last.clone());
            }

            let before = buf.len();
            {
                let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
                buf.extend(page.into_iter().filter(|id| in_flight.insert(id.clone())));
            }
            if buf.len() > before {
                return Ok(buf.len() - before);
            }

            if reached_end {
                *after = None;
                if wrapped {
                    return Ok(0);
                }
                wrapped = true;
            }
        }
    }
}

//! Shared test fixtures.
#![allow(dead_code)]

use async_trait::async_trait;
use plateq::error::{Error, Result};
use plateq::ledger::{Ledger, MemoryLedger};
use plateq::model::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A [`MemoryLedger`] whose reads and batch writes fail a set number of times
/// with a store error before succeeding.
#[derive(Default)]
pub struct FlakyLedger {
    pub inner: MemoryLedger,
    read_failures: AtomicUsize,
    write_failures: AtomicUsize,
    pub batch_writes: AtomicUsize,
}

impl FlakyLedger {
    pub fn failing_reads(n: usize) -> Self {
        let ledger = Self::default();
        ledger.read_failures.store(n, Ordering::SeqCst);
        ledger
    }

    pub fn failing_writes(n: usize) -> Self {
        let ledger = Self::default();
        ledger.write_failures.store(n, Ordering::SeqCst);
        ledger
    }

    fn trip(counter: &AtomicUsize) -> Result<()> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(Error::Store(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn get(&self, key: &PlateKey) -> Result<Option<WorkItem>> {
        self.inner.get(key).await
    }

    async fn add_one(&self, add: &NewPlate) -> Result<bool> {
        self.inner.add_one(add).await
    }

    async fn add_many(&self, adds: &[NewPlate]) -> Result<AddSummary> {
        self.batch_writes.fetch_add(1, Ordering::SeqCst);
        Self::trip(&self.write_failures)?;
        self.inner.add_many(adds).await
    }

    async fn add_many_unchecked(&self, adds: &[NewPlate]) -> Result<u64> {
        self.batch_writes.fetch_add(1, Ordering::SeqCst);
        Self::trip(&self.write_failures)?;
        self.inner.add_many_unchecked(adds).await
    }

    async fn fetch_pending(
        &self,
        jurisdiction: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>> {
        Self::trip(&self.read_failures)?;
        self.inner.fetch_pending(jurisdiction, after, limit).await
    }

    async fn record(&self, completion: &Completion) -> Result<bool> {
        self.inner.record(completion).await
    }

    async fn record_many(&self, completions: &[Completion]) -> Result<u64> {
        self.batch_writes.fetch_add(1, Ordering::SeqCst);
        Self::trip(&self.write_failures)?;
        self.inner.record_many(completions).await
    }

    async fn counts(&self, jurisdiction: Option<&str>) -> Result<StateCounts> {
        Self::trip(&self.read_failures)?;
        self.inner.counts(jurisdiction).await
    }

    async fn identifiers_in_state(
        &self,
        jurisdiction: &str,
        state: State,
    ) -> Result<HashSet<String>> {
        self.inner.identifiers_in_state(jurisdiction, state).await
    }

    async fn purge(&self, identifier: &str) -> Result<u64> {
        self.inner.purge(identifier).await
    }

    async fn requeue_errors(&self, jurisdiction: &str) -> Result<u64> {
        self.inner.requeue_errors(jurisdiction).await
    }
}

/// Add `identifiers` as pending NY items.
pub async fn seed(ledger: &dyn Ledger, identifiers: &[&str]) {
    let adds: Vec<NewPlate> = identifiers
        .iter()
        .map(|id| NewPlate::new(PlateKey::new(*id, "NY")))
        .collect();
    ledger.add_many(&adds).await.unwrap();
}

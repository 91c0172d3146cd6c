//! In-process ledger.
//!
//! Same contract and constraints as the Postgres ledger: non-empty key parts,
//! unique keys, guarded pending-only updates, all-or-nothing batches.

use super::Ledger;
use crate::error::{Error, Result};
use crate::model::*;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use tokio::sync::Mutex;

type Items = BTreeMap<PlateKey, WorkItem>;

#[derive(Default)]
pub struct MemoryLedger {
    items: Mutex<Items>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all jurisdictions.
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

fn check_key(key: &PlateKey) -> Result<()> {
    if key.identifier.is_empty() || key.jurisdiction.is_empty() {
        return Err(Error::Constraint(format!("empty key part in {key:?}")));
    }
    Ok(())
}

fn pending_item(add: &NewPlate) -> WorkItem {
    let now = Utc::now();
    WorkItem {
        key: add.key.clone(),
        status: Status::Pending,
        tag: add.tag.clone(),
        created_at: now,
        updated_at: now,
    }
}

/// Insert if absent. Returns `true` if the key already existed.
fn add_one_on(items: &mut Items, add: &NewPlate) -> Result<bool> {
    check_key(&add.key)?;
    if items.contains_key(&add.key) {
        return Ok(true);
    }
    items.insert(add.key.clone(), pending_item(add));
    Ok(false)
}

fn record_on(items: &mut Items, completion: &Completion) -> bool {
    let Some(item) = items.get_mut(&completion.key) else {
        return false;
    };
    if !item.state().can_transition_to(completion.outcome.state()) {
        return false;
    }
    item.status = match &completion.outcome {
        Outcome::Done(amount) => Status::Done { amount: *amount },
        Outcome::Error(message) => Status::Error {
            message: message.clone(),
        },
    };
    item.updated_at = Utc::now();
    true
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get(&self, key: &PlateKey) -> Result<Option<WorkItem>> {
        Ok(self.items.lock().await.get(key).cloned())
    }

    async fn add_one(&self, add: &NewPlate) -> Result<bool> {
        add_one_on(&mut *self.items.lock().await, add)
    }

    async fn add_many(&self, adds: &[NewPlate]) -> Result<AddSummary> {
        let mut items = self.items.lock().await;
        // Stage against a copy; commit by swapping it in.
        let mut staged = items.clone();
        let mut summary = AddSummary::default();
        for add in adds {
            if add_one_on(&mut staged, add)? {
                summary.existed += 1;
            } else {
                summary.added += 1;
            }
        }
        *items = staged;
        Ok(summary)
    }

    async fn add_many_unchecked(&self, adds: &[NewPlate]) -> Result<u64> {
        let mut items = self.items.lock().await;
        let mut staged = items.clone();
        let mut inserted = 0;
        for add in adds {
            check_key(&add.key)?;
            if staged.contains_key(&add.key) {
                return Err(Error::Constraint(format!("duplicate key {}", add.key)));
            }
            staged.insert(add.key.clone(), pending_item(add));
            inserted += 1;
        }
        *items = staged;
        Ok(inserted)
    }

    async fn fetch_pending(
        &self,
        jurisdiction: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let items = self.items.lock().await;
        let start = match after {
            Some(after) => Bound::Excluded(PlateKey::new(after, jurisdiction)),
            None => Bound::Included(PlateKey::new("", jurisdiction)),
        };
        Ok(items
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| key.jurisdiction == jurisdiction)
            .filter(|(_, item)| item.state() == State::Pending)
            .take(limit)
            .map(|(key, _)| key.identifier.clone())
            .collect())
    }

    async fn record(&self, completion: &Completion) -> Result<bool> {
        Ok(record_on(&mut *self.items.lock().await, completion))
    }

    async fn record_many(&self, completions: &[Completion]) -> Result<u64> {
        let mut items = self.items.lock().await;
        Ok(completions
            .iter()
            .filter(|completion| record_on(&mut items, completion))
            .count() as u64)
    }

    async fn counts(&self, jurisdiction: Option<&str>) -> Result<StateCounts> {
        let items = self.items.lock().await;
        let mut counts = StateCounts::default();
        for item in items
            .values()
            .filter(|item| jurisdiction.is_none_or(|j| item.key.jurisdiction == j))
        {
            let state = item.state();
            counts.set(state, counts.get(state) + 1);
        }
        Ok(counts)
    }

    async fn identifiers_in_state(
        &self,
        jurisdiction: &str,
        state: State,
    ) -> Result<HashSet<String>> {
        let items = self.items.lock().await;
        Ok(items
            .values()
            .filter(|item| item.key.jurisdiction == jurisdiction && item.state() == state)
            .map(|item| item.key.identifier.clone())
            .collect())
    }

    async fn purge(&self, identifier: &str) -> Result<u64> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|key, _| key.identifier != identifier);
        Ok((before - items.len()) as u64)
    }

    async fn requeue_errors(&self, jurisdiction: &str) -> Result<u64> {
        let mut items = self.items.lock().await;
        let now = Utc::now();
        let mut moved = 0;
        for item in items
            .values_mut()
            .filter(|item| item.key.jurisdiction == jurisdiction && item.state() == State::Error)
        {
            item.status = Status::Pending;
            item.updated_at = now;
            moved += 1;
        }
        Ok(moved)
    }
}

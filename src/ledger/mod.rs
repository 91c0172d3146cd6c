//! The status ledger: durable home of every work item.
//!
//! [`Ledger`] is the store contract the rest of the crate is written against.
//! [`crate::db::Db`] implements it on Postgres; [`MemoryLedger`] implements it
//! in process.

pub mod memory;

pub use memory::MemoryLedger;

use crate::error::Result;
use crate::model::{AddSummary, Completion, NewPlate, PlateKey, State, StateCounts, WorkItem};
use async_trait::async_trait;
use std::collections::HashSet;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Point lookup by key.
    async fn get(&self, key: &PlateKey) -> Result<Option<WorkItem>>;

    /// Insert a pending record unless the key exists. Returns `true` if it already existed.
    async fn add_one(&self, add: &NewPlate) -> Result<bool>;

    /// [`Ledger::add_one`] for every item inside one transaction. All or nothing.
    async fn add_many(&self, adds: &[NewPlate]) -> Result<AddSummary>;

    /// Bulk insert without an existence check. A duplicate key fails the call
    /// with [`crate::error::Error::Constraint`]. Returns the number inserted.
    async fn add_many_unchecked(&self, adds: &[NewPlate]) -> Result<u64>;

    /// Up to `limit` pending identifiers of a jurisdiction, ordered by
    /// identifier, strictly after `after` when given.
    async fn fetch_pending(
        &self,
        jurisdiction: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// Apply a lookup outcome to a pending item.
    ///
    /// Returns `false` when the item is missing or no longer pending; that is
    /// a stale duplicate attempt, not an error.
    async fn record(&self, completion: &Completion) -> Result<bool>;

    /// [`Ledger::record`] for every completion inside one transaction.
    /// Returns the number of items actually moved out of pending.
    async fn record_many(&self, completions: &[Completion]) -> Result<u64>;

    /// Counts per state, across all jurisdictions when `jurisdiction` is `None`.
    async fn counts(&self, jurisdiction: Option<&str>) -> Result<StateCounts>;

    /// Snapshot of identifiers of a jurisdiction currently in `state`.
    async fn identifiers_in_state(&self, jurisdiction: &str, state: State)
    -> Result<HashSet<String>>;

    /// Delete every record with this identifier, in any jurisdiction.
    async fn purge(&self, identifier: &str) -> Result<u64>;

    /// Move errored items of a jurisdiction back to pending, clearing the error.
    async fn requeue_errors(&self, jurisdiction: &str) -> Result<u64>;
}

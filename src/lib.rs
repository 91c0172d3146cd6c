//! # plateq
//!
//! Durable work-queue and status ledger for bulk license-plate lookups.
//!
//! Identifiers are generated from a character-range template or streamed from
//! a file, added to a Postgres-backed ledger as pending items, and drained by
//! a pool of concurrent workers that record the amount owed (or the lookup
//! error) for each plate. Results are written directly or in transactional
//! batches; a monitor samples ledger progress while work runs.

pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod generator;
pub mod ledger;
pub mod lookup;
pub mod model;
pub mod monitor;
pub mod pool;
pub mod producer;
pub mod queue;
pub mod sink;
pub mod telemetry;

//! The lookup collaborator: (identifier, jurisdiction) -> amount owed.
//!
//! Workers only see the [`Lookup`] trait. [`CityPayLookup`] is the production
//! implementation; [`FnLookup`] adapts a plain function or closure.

pub mod citypay;

pub use citypay::CityPayLookup;

use crate::model::Amount;
use async_trait::async_trait;
use thiserror::Error;

/// Why a single lookup failed. The display text is what the ledger records.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("bad amount in response: {0}")]
    Amount(String),

    #[error("{0}")]
    Rejected(String),
}

#[async_trait]
pub trait Lookup: Send + Sync {
    async fn total_owed(&self, identifier: &str, jurisdiction: &str)
    -> Result<Amount, LookupError>;
}

/// A [`Lookup`] backed by a synchronous function.
pub struct FnLookup<F>(pub F);

#[async_trait]
impl<F> Lookup for FnLookup<F>
where
    F: Fn(&str, &str) -> Result<Amount, LookupError> + Send + Sync,
{
    async fn total_owed(
        &self,
        identifier: &str,
        jurisdiction: &str,
    ) -> Result<Amount, LookupError> {
        (self.0)(identifier, jurisdiction)
    }
}

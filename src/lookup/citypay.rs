//! NYC CityPay parking-violation search.
//!
//! Posts the plate search form and sums every payable amount rendered in the
//! result page (`value="65.00" step="0.01"` inputs).

use super::{Lookup, LookupError};
use crate::model::Amount;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://a836-citypay.nyc.gov/citypay/Parking/searchResults";
const DEFAULT_JURISDICTION: &str = "NY";

static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"value="(\d+\.\d{2})" step="0\.01""#).expect("static regex is valid")
});

pub struct CityPayLookup {
    client: reqwest::Client,
    endpoint: String,
}

impl CityPayLookup {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Lookup for CityPayLookup {
    async fn total_owed(
        &self,
        identifier: &str,
        jurisdiction: &str,
    ) -> Result<Amount, LookupError> {
        let jurisdiction = if jurisdiction.is_empty() {
            DEFAULT_JURISDICTION
        } else {
            jurisdiction
        };
        let body = format!("PLATE_NUMBER={identifier}&PLATE_STATE={jurisdiction}&PLATE_TYPE=++");

        let resp = self
            .client
            .post(&self.endpoint)
            .header(
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("content-type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(LookupError::Status(resp.status()));
        }

        let page = resp.text().await?;
        parse_total(&page)
    }
}

/// Sum of every payable amount in a search result page. A page with none owes zero.
pub fn parse_total(page: &str) -> Result<Amount, LookupError> {
    AMOUNT_RE
        .captures_iter(page)
        .try_fold(Amount::ZERO, |total, caps| {
            let bad = || LookupError::Amount(caps[1].to_string());
            let amount = Amount::parse(&caps[1]).map_err(|_| bad())?;
            total.checked_add(amount).ok_or_else(bad)
        })
}

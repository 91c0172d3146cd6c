//! Core data model.
//!
//! A work item is one plate lookup: identity is (identifier, jurisdiction),
//! and it carries a lifecycle status plus an optional provenance tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// Natural key of a ledger record. Unique across the ledger.
///
/// Ordered by jurisdiction first so that per-jurisdiction scans are contiguous.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlateKey {
    pub jurisdiction: String,
    pub identifier: String,
}

impl PlateKey {
    pub fn new(identifier: impl Into<String>, jurisdiction: impl Into<String>) -> Self {
        Self {
            jurisdiction: jurisdiction.into(),
            identifier: identifier.into(),
        }
    }
}

impl std::fmt::Display for PlateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.identifier, self.jurisdiction)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Added, waiting for a lookup.
    Pending,
    /// Looked up successfully; the amount owed is recorded.
    Done,
    /// Lookup failed; the error text is recorded.
    Error,
}

impl State {
    pub const ALL: [State; 3] = [State::Pending, State::Done, State::Error];

    /// Can a worker move an item from self to `to`?
    ///
    /// `Error -> Pending` is deliberately absent: requeueing is an explicit
    /// maintenance operation, not a worker transition.
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        matches!((self, to), (Pending, Done) | (Pending, Error))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Done => "done",
            State::Error => "error",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for State {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(State::Pending),
            "done" => Ok(State::Done),
            "error" => Ok(State::Error),
            _ => Err(Error::Other(format!("unknown state: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

/// A monetary amount in whole cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Parse a decimal like `"12.50"`, `"12.5"` or `"12"`. ASCII digits only, with
    /// one optional leading `-` and at most two fraction digits.
    pub fn parse(s: &str) -> Result<Self> {
        let bad = || Error::Other(format!("invalid amount: {s:?}"));
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty()
            || frac.len() > 2
            || (digits.contains('.') && frac.is_empty())
            || !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit())
        {
            return Err(bad());
        }
        let whole: i64 = whole.parse().map_err(|_| bad())?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| bad())? * 10,
            _ => frac.parse().map_err(|_| bad())?,
        };
        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac))
            .ok_or_else(bad)?;
        Ok(Self(if negative { -cents } else { cents }))
    }

    /// `None` on overflow.
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// Status of a work item together with the data valid in that state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Status {
    Pending,
    Done { amount: Amount },
    Error { message: String },
}

impl Status {
    pub fn state(&self) -> State {
        match self {
            Status::Pending => State::Pending,
            Status::Done { .. } => State::Done,
            Status::Error { .. } => State::Error,
        }
    }
}

/// One ledger record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub key: PlateKey,
    pub status: Status,
    /// Free-form provenance label. Set at insert, never changed.
    pub tag: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn state(&self) -> State {
        self.status.state()
    }
}

// ---------------------------------------------------------------------------
// Buffered mutations
// ---------------------------------------------------------------------------

/// A pending insert (the add path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPlate {
    pub key: PlateKey,
    pub tag: Option<String>,
}

impl NewPlate {
    pub fn new(key: PlateKey) -> Self {
        Self { key, tag: None }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// What a lookup attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done(Amount),
    Error(String),
}

impl Outcome {
    pub fn state(&self) -> State {
        match self {
            Outcome::Done(_) => State::Done,
            Outcome::Error(_) => State::Error,
        }
    }
}

/// A pending update (the result path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub key: PlateKey,
    pub outcome: Outcome,
}

impl Completion {
    pub fn done(key: PlateKey, amount: Amount) -> Self {
        Self {
            key,
            outcome: Outcome::Done(amount),
        }
    }

    pub fn error(key: PlateKey, message: impl Into<String>) -> Self {
        Self {
            key,
            outcome: Outcome::Error(message.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Record counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: u64,
    pub done: u64,
    pub error: u64,
}

impl StateCounts {
    pub fn get(&self, state: State) -> u64 {
        match state {
            State::Pending => self.pending,
            State::Done => self.done,
            State::Error => self.error,
        }
    }

    pub fn set(&mut self, state: State, n: u64) {
        match state {
            State::Pending => self.pending = n,
            State::Done => self.done = n,
            State::Error => self.error = n,
        }
    }

    /// Items that have been attempted at least once.
    pub fn finished(&self) -> u64 {
        self.done + self.error
    }

    pub fn total(&self) -> u64 {
        self.pending + self.done + self.error
    }
}

/// Result of a transactional batch add.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddSummary {
    pub added: u64,
    pub existed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_parses_and_displays() {
        assert_eq!(Amount::parse("12.50").unwrap(), Amount::from_cents(1250));
        assert_eq!(Amount::parse("12.5").unwrap(), Amount::from_cents(1250));
        assert_eq!(Amount::parse("7").unwrap(), Amount::from_cents(700));
        assert_eq!(Amount::from_cents(1250).to_string(), "$12.50");
        assert_eq!(Amount::from_cents(-5).to_string(), "-$0.05");
        assert!(Amount::parse("1.234").is_err());
        assert!(Amount::parse(".5").is_err());
        assert!(Amount::parse("abc").is_err());
        assert_eq!(Amount::parse("-3.05").unwrap(), Amount::from_cents(-305));
        assert!(Amount::parse("1.-5").is_err());
        assert!(Amount::parse("1.+5").is_err());
        assert!(Amount::parse("--5").is_err());
        assert!(Amount::parse("+5").is_err());
        assert!(Amount::parse("5.").is_err());
    }

    #[test]
    fn amount_addition_detects_overflow() {
        let big = Amount::from_cents(i64::MAX);
        assert_eq!(
            Amount::from_cents(150).checked_add(Amount::from_cents(25)),
            Some(Amount::from_cents(175))
        );
        assert_eq!(big.checked_add(Amount::from_cents(1)), None);
    }

    #[test]
    fn workers_only_move_pending_items() {
        assert!(State::Pending.can_transition_to(State::Done));
        assert!(State::Pending.can_transition_to(State::Error));
        assert!(!State::Done.can_transition_to(State::Error));
        assert!(!State::Error.can_transition_to(State::Pending));
        assert!(!State::Pending.can_transition_to(State::Pending));
    }

    #[test]
    fn state_round_trips_through_str() {
        for state in State::ALL {
            assert_eq!(state.as_str().parse::<State>().unwrap(), state);
        }
        assert!("unset".parse::<State>().is_err());
    }
}

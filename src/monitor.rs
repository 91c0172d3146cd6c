//! Periodic ledger sampler.
//!
//! Reads state counts on a fixed interval and logs them with the change since
//! the previous sample. It never writes, and a failed read is logged and
//! retried on the next tick.

use crate::error::Result;
use crate::ledger::Ledger;
use crate::model::{State, StateCounts};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Change between two samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delta {
    pub pending: i64,
    pub done: i64,
    pub error: i64,
    /// Items finished (done or error) per second.
    pub rate_per_sec: f64,
}

/// Difference from `prev` to `next`, taken `elapsed` apart.
pub fn delta(prev: &StateCounts, next: &StateCounts, elapsed: Duration) -> Delta {
    let diff = |a: u64, b: u64| b as i64 - a as i64;
    let finished = diff(prev.finished(), next.finished());
    let secs = elapsed.as_secs_f64();
    Delta {
        pending: diff(prev.pending, next.pending),
        done: diff(prev.done, next.done),
        error: diff(prev.error, next.error),
        rate_per_sec: if secs > 0.0 { finished as f64 / secs } else { 0.0 },
    }
}

pub struct Monitor {
    ledger: Arc<dyn Ledger>,
    interval: Duration,
    jurisdiction: Option<String>,
}

impl Monitor {
    pub fn new(ledger: Arc<dyn Ledger>, interval: Duration) -> Self {
        Self {
            ledger,
            interval,
            jurisdiction: None,
        }
    }

    /// Only count items of one jurisdiction.
    pub fn jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    /// One read of the per-state counts, also published on the items gauge.
    pub async fn sample(&self) -> Result<StateCounts> {
        let counts = self.ledger.counts(self.jurisdiction.as_deref()).await?;
        let gauge = metrics::ledger_items();
        for state in State::ALL {
            gauge.record(counts.get(state), &[KeyValue::new("state", state.as_str())]);
        }
        Ok(counts)
    }

    /// Sample every interval until `cancel` fires. Returns the number of
    /// successful samples.
    pub async fn run(&self, cancel: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<(StateCounts, Instant)> = None;
        let mut samples = 0;

        while cancel.run_until_cancelled(ticker.tick()).await.is_some() {
            let counts = match self.sample().await {
                Ok(counts) => counts,
                Err(e) => {
                    warn!(error = %e, "monitor sample failed");
                    continue;
                }
            };
            samples += 1;
            let now = Instant::now();
            match &last {
                None => info!(
                    pending = counts.pending,
                    done = counts.done,
                    error = counts.error,
                    "ledger status"
                ),
                Some((prev, at)) => {
                    let d = delta(prev, &counts, now - *at);
                    info!(
                        pending = counts.pending,
                        done = counts.done,
                        error = counts.error,
                        pending_delta = d.pending,
                        done_delta = d.done,
                        error_delta = d.error,
                        rate = format!("{:.2}/s", d.rate_per_sec),
                        "ledger status"
                    );
                }
            }
            last = Some((counts, now));
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pending: u64, done: u64, error: u64) -> StateCounts {
        StateCounts {
            pending,
            done,
            error,
        }
    }

    #[test]
    fn rate_counts_done_and_error() {
        let d = delta(
            &counts(100, 10, 0),
            &counts(80, 25, 5),
            Duration::from_secs(10),
        );
        assert_eq!(d.pending, -20);
        assert_eq!(d.done, 15);
        assert_eq!(d.error, 5);
        assert!((d.rate_per_sec - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_elapsed_has_zero_rate() {
        let d = delta(&counts(1, 0, 0), &counts(0, 1, 0), Duration::ZERO);
        assert_eq!(d.rate_per_sec, 0.0);
    }

    #[test]
    fn requeue_shows_as_negative_error_delta() {
        let d = delta(&counts(0, 3, 4), &counts(4, 3, 0), Duration::from_secs(1));
        assert_eq!(d.pending, 4);
        assert_eq!(d.error, -4);
        assert_eq!(d.rate_per_sec, -4.0);
    }
}

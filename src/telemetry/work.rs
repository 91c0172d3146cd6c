//! Lookup span helpers.

use crate::model::{PlateKey, State};
use tracing::Span;

/// Start a span for one lookup attempt.
///
/// `plate.state` is declared empty and filled by [`record_outcome`].
pub fn start_lookup_span(worker: usize, key: &PlateKey) -> Span {
    tracing::info_span!(
        "plate.lookup",
        "worker" = worker,
        "plate.identifier" = %key.identifier,
        "plate.jurisdiction" = %key.jurisdiction,
        "plate.state" = tracing::field::Empty,
    )
}

/// Record the state the attempt produced on its span.
pub fn record_outcome(span: &Span, state: State) {
    span.record("plate.state", state.as_str());
}

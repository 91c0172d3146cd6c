//! Candidate identifier generation.
//!
//! Identifiers come from one of three places: a character-range template
//! expanded into its Cartesian product, a line-delimited file, or a column of
//! a delimited table. Whatever the source, [`spawn`] runs the enumeration on a
//! blocking thread and feeds a bounded channel, so generation overlaps with
//! ledger inserts downstream.

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Character-range templates
// ---------------------------------------------------------------------------

/// Letters and decimal digits in `[from, to]`.
fn valid_chars(from: char, to: char) -> Vec<char> {
    (from..=to)
        .filter(|c| c.is_alphabetic() || c.is_ascii_digit())
        .collect()
}

/// Lazy Cartesian product of per-position character ranges.
///
/// Enumerates in column-major order: position 0 is the outermost (slowest)
/// column and the last position turns fastest, like an odometer.
#[derive(Debug, Clone)]
pub struct Combinations {
    columns: Vec<Vec<char>>,
    indices: Vec<usize>,
    exhausted: bool,
}

impl Combinations {
    /// Build from two equal-length templates.
    pub fn new(from: &str, to: &str) -> Result<Self> {
        if from.is_empty() {
            return Err(Error::Config("--from required".to_string()));
        }
        if to.is_empty() {
            return Err(Error::Config("--to required".to_string()));
        }
        let froms: Vec<char> = from.chars().collect();
        let tos: Vec<char> = to.chars().collect();
        if froms.len() != tos.len() {
            return Err(Error::Config(format!(
                "len(--from) must equal len(--to): {} != {}",
                froms.len(),
                tos.len()
            )));
        }

        let mut columns = Vec::with_capacity(froms.len());
        for (i, (&lo, &hi)) in froms.iter().zip(&tos).enumerate() {
            if lo > hi {
                return Err(Error::Config(format!(
                    "position {i}: {lo:?} is after {hi:?}"
                )));
            }
            columns.push(valid_chars(lo, hi));
        }

        let exhausted = columns.iter().any(Vec::is_empty);
        Ok(Self {
            indices: vec![0; columns.len()],
            columns,
            exhausted,
        })
    }

    /// Size of the whole product, `None` if it overflows.
    pub fn total(&self) -> Option<u128> {
        self.columns
            .iter()
            .try_fold(1u128, |acc, col| acc.checked_mul(col.len() as u128))
    }

    fn current(&self) -> String {
        self.indices
            .iter()
            .zip(&self.columns)
            .map(|(&i, col)| col[i])
            .collect()
    }

    /// Advance the odometer. Marks the sequence exhausted after the last value.
    fn advance(&mut self) {
        for pos in (0..self.columns.len()).rev() {
            self.indices[pos] += 1;
            if self.indices[pos] < self.columns[pos].len() {
                return;
            }
            self.indices[pos] = 0;
        }
        self.exhausted = true;
    }
}

impl Iterator for Combinations {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.exhausted {
            return None;
        }
        let value = self.current();
        self.advance();
        Some(value)
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Where candidate identifiers come from.
#[derive(Debug, Clone)]
pub enum Source {
    /// Cartesian product of a character-range template pair.
    Range { from: String, to: String },
    /// One identifier per line.
    Lines { path: PathBuf, skip_header: bool },
    /// One column of a delimited table.
    Table {
        path: PathBuf,
        column: usize,
        skip_header: bool,
        delimiter: u8,
    },
    /// An explicit in-memory list.
    List(Vec<String>),
}

impl Source {
    /// Open the source, failing early on configuration or I/O problems.
    pub fn open(self) -> Result<Box<dyn Iterator<Item = Result<String>> + Send>> {
        match self {
            Source::Range { from, to } => {
                let combos = Combinations::new(&from, &to)?;
                info!(from, to, total = ?combos.total(), "expanding template");
                Ok(Box::new(combos.map(Ok::<_, Error>)))
            }
            Source::Lines { path, skip_header } => {
                let file = File::open(&path)?;
                Ok(Box::new(read_lines(BufReader::new(file), skip_header)))
            }
            Source::Table {
                path,
                column,
                skip_header,
                delimiter,
            } => {
                let file = File::open(&path)?;
                Ok(Box::new(read_column(file, column, skip_header, delimiter)))
            }
            Source::List(items) => Ok(Box::new(
                items
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .map(Ok::<_, Error>),
            )),
        }
    }
}

/// Identifiers from a line-delimited reader. Blank lines are skipped.
pub fn read_lines<R: BufRead + Send + 'static>(
    reader: R,
    skip_header: bool,
) -> impl Iterator<Item = Result<String>> + Send {
    reader
        .lines()
        .skip(usize::from(skip_header))
        .filter_map(|line| match line {
            Ok(line) => {
                let line = line.trim();
                (!line.is_empty()).then(|| Ok(line.to_string()))
            }
            Err(e) => Some(Err(Error::from(e))),
        })
}

/// Identifiers from column `column` of a delimited reader.
pub fn read_column<R: std::io::Read + Send + 'static>(
    reader: R,
    column: usize,
    skip_header: bool,
    delimiter: u8,
) -> impl Iterator<Item = Result<String>> + Send {
    let reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(reader);

    reader
        .into_records()
        .skip(usize::from(skip_header))
        .filter_map(move |record| {
            let record = match record {
                Ok(record) => record,
                Err(e) => return Some(Err(Error::from(e))),
            };
            match record.get(column) {
                Some(value) => {
                    let value = value.trim();
                    (!value.is_empty()).then(|| Ok(value.to_string()))
                }
                None => Some(Err(Error::Ingest(format!(
                    "record at line {} has no column {column}",
                    record.position().map_or(0, |p| p.line())
                )))),
            }
        })
}

// ---------------------------------------------------------------------------
// Channel producer
// ---------------------------------------------------------------------------

/// Open `source` and stream its identifiers into a bounded channel.
///
/// Identifiers in `exclude` (a ledger snapshot taken once by the caller) are
/// dropped. The returned handle resolves to the number of identifiers sent.
/// Generation stops early, still resolving to the count sent, when the
/// receiver is dropped or `cancel` fires.
pub fn spawn(
    source: Source,
    exclude: Option<HashSet<String>>,
    capacity: usize,
    cancel: CancellationToken,
) -> Result<(mpsc::Receiver<String>, JoinHandle<Result<u64>>)> {
    let items = source.open()?;
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let handle = tokio::task::spawn_blocking(move || {
        let mut sent = 0u64;
        let mut skipped = 0u64;
        for item in items {
            if cancel.is_cancelled() {
                info!(sent, skipped, "generator cancelled");
                return Ok(sent);
            }
            let identifier = item?;
            if exclude.as_ref().is_some_and(|ex| ex.contains(&identifier)) {
                skipped += 1;
                continue;
            }
            if tx.blocking_send(identifier).is_err() {
                debug!("generator receiver dropped");
                break;
            }
            sent += 1;
        }
        info!(sent, skipped, "generator finished");
        Ok(sent)
    });

    Ok((rx, handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odometer_turns_last_position_fastest() {
        let all: Vec<String> = Combinations::new("A0", "B1").unwrap().collect();
        assert_eq!(all, vec!["A0", "A1", "B0", "B1"]);
    }

    #[test]
    fn non_alphanumeric_chars_are_skipped() {
        // '/' .. '1' spans '/', '0', '1'
        let all: Vec<String> = Combinations::new("/", "1").unwrap().collect();
        assert_eq!(all, vec!["0", "1"]);
    }

    #[test]
    fn numeric_symbols_are_not_digits() {
        assert!(valid_chars('\u{b2}', '\u{b3}').is_empty());
        assert!(valid_chars('\u{bc}', '\u{be}').is_empty());
        assert_eq!(valid_chars('0', '9').len(), 10);
    }

    #[test]
    fn empty_column_yields_nothing() {
        let mut combos = Combinations::new("A-", "Z-").unwrap();
        assert_eq!(combos.total(), Some(0));
        assert!(combos.next().is_none());
    }
}

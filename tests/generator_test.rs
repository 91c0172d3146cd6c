use plateq::error::Error;
use plateq::generator::{self, Combinations, Source, read_column, read_lines};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use tokio_util::sync::CancellationToken;

#[test]
fn range_yields_full_product_of_distinct_identifiers() {
    let combos = Combinations::new("A0A", "C9B").unwrap();
    assert_eq!(combos.total(), Some(3 * 10 * 2));

    let all: Vec<String> = combos.collect();
    assert_eq!(all.len(), 60);
    assert!(all.iter().all(|id| id.len() == 3));
    let distinct: HashSet<&String> = all.iter().collect();
    assert_eq!(distinct.len(), 60);
    assert_eq!(all.first().map(String::as_str), Some("A0A"));
    assert_eq!(all.last().map(String::as_str), Some("C9B"));
}

#[test]
fn two_letter_range() {
    let all: Vec<String> = Combinations::new("AA", "AB").unwrap().collect();
    assert_eq!(all, vec!["AA", "AB"]);
}

#[test]
fn bad_templates_are_configuration_errors() {
    assert!(matches!(Combinations::new("", "A"), Err(Error::Config(_))));
    assert!(matches!(Combinations::new("AA", "A"), Err(Error::Config(_))));
    assert!(matches!(Combinations::new("B", "A"), Err(Error::Config(_))));
}

#[test]
fn lines_skip_header() {
    let ids: Vec<String> = read_lines(Cursor::new("PLATE\nABC123\n"), true)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(ids, vec!["ABC123"]);
}

#[test]
fn lines_ignore_blanks_and_whitespace() {
    let ids: Vec<String> = read_lines(Cursor::new("  X1 \n\nX2\r\n"), false)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(ids, vec!["X1", "X2"]);
}

#[test]
fn table_column_with_header() {
    let data = "summons,plate,state\n1,ABC123,NY\n2,XYZ9,NJ\n";
    let ids: Vec<String> = read_column(Cursor::new(data), 1, true, b',')
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(ids, vec!["ABC123", "XYZ9"]);
}

#[test]
fn table_missing_column_is_an_ingest_error() {
    let mut rows = read_column(Cursor::new("a;b\nc\n"), 1, false, b';');
    assert_eq!(rows.next().unwrap().unwrap(), "b");
    assert!(matches!(rows.next(), Some(Err(Error::Ingest(_)))));
}

#[test]
fn lines_source_reads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "PLATE\nABC123\n").unwrap();
    let ids: Vec<String> = Source::Lines {
        path: file.path().to_path_buf(),
        skip_header: true,
    }
    .open()
    .unwrap()
    .collect::<Result<_, _>>()
    .unwrap();
    assert_eq!(ids, vec!["ABC123"]);
}

#[test]
fn missing_file_fails_on_open() {
    let source = Source::Lines {
        path: "/nonexistent/plates.txt".into(),
        skip_header: false,
    };
    assert!(matches!(source.open(), Err(Error::Io(_))));
}

#[tokio::test]
async fn spawn_streams_and_excludes_done_identifiers() {
    let exclude: HashSet<String> = ["AB".to_string()].into_iter().collect();
    let (mut rx, handle) = generator::spawn(
        Source::Range {
            from: "AA".into(),
            to: "AC".into(),
        },
        Some(exclude),
        1,
        CancellationToken::new(),
    )
    .unwrap();

    let mut got = Vec::new();
    while let Some(id) = rx.recv().await {
        got.push(id);
    }
    assert_eq!(got, vec!["AA", "AC"]);
    assert_eq!(handle.await.unwrap().unwrap(), 2);
}

#[tokio::test]
async fn spawn_stops_when_cancelled() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let (mut rx, handle) = generator::spawn(
        Source::Range {
            from: "AAA".into(),
            to: "ZZZ".into(),
        },
        None,
        4,
        cancel,
    )
    .unwrap();

    assert_eq!(handle.await.unwrap().unwrap(), 0);
    assert!(rx.recv().await.is_none());
}

#[test]
fn spawn_rejects_bad_range_before_starting() {
    let result = generator::spawn(
        Source::Range {
            from: "AAA".into(),
            to: "A".into(),
        },
        None,
        4,
        CancellationToken::new(),
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

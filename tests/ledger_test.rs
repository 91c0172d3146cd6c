use plateq::error::Error;
use plateq::ledger::{Ledger, MemoryLedger};
use plateq::model::*;

fn plate(id: &str) -> NewPlate {
    NewPlate::new(PlateKey::new(id, "NY"))
}

#[tokio::test]
async fn add_one_is_idempotent() {
    let ledger = MemoryLedger::new();
    let add = plate("ABC123").tag("bulk-2024");

    assert!(!ledger.add_one(&add).await.unwrap());
    assert!(ledger.add_one(&add).await.unwrap());
    assert_eq!(ledger.len().await, 1);

    let item = ledger.get(&add.key).await.unwrap().unwrap();
    assert_eq!(item.status, Status::Pending);
    assert_eq!(item.tag.as_deref(), Some("bulk-2024"));
}

#[tokio::test]
async fn same_identifier_in_two_jurisdictions_is_two_items() {
    let ledger = MemoryLedger::new();
    ledger.add_one(&plate("X1")).await.unwrap();
    let existed = ledger
        .add_one(&NewPlate::new(PlateKey::new("X1", "NJ")))
        .await
        .unwrap();
    assert!(!existed);
    assert_eq!(ledger.len().await, 2);
}

#[tokio::test]
async fn add_many_counts_added_and_existing() {
    let ledger = MemoryLedger::new();
    ledger.add_one(&plate("B")).await.unwrap();

    let summary = ledger
        .add_many(&[plate("A"), plate("B"), plate("C")])
        .await
        .unwrap();
    assert_eq!(summary, AddSummary { added: 2, existed: 1 });
    assert_eq!(ledger.counts(None).await.unwrap().pending, 3);
}

#[tokio::test]
async fn add_many_is_all_or_nothing() {
    let ledger = MemoryLedger::new();
    let result = ledger.add_many(&[plate("A"), plate(""), plate("C")]).await;

    assert!(matches!(result, Err(Error::Constraint(_))));
    assert!(ledger.is_empty().await);
}

#[tokio::test]
async fn unchecked_insert_rejects_duplicates() {
    let ledger = MemoryLedger::new();
    assert_eq!(
        ledger
            .add_many_unchecked(&[plate("A"), plate("B")])
            .await
            .unwrap(),
        2
    );
    let dup = ledger.add_many_unchecked(&[plate("B")]).await;
    assert!(matches!(dup, Err(Error::Constraint(_))));
}

#[tokio::test]
async fn unchecked_insert_keeps_nothing_from_a_failed_chunk() {
    let ledger = MemoryLedger::new();
    ledger.add_one(&plate("C")).await.unwrap();

    let dup = ledger
        .add_many_unchecked(&[plate("A"), plate("B"), plate("C")])
        .await;
    assert!(matches!(dup, Err(Error::Constraint(_))));
    assert_eq!(ledger.len().await, 1);

    let repeated = ledger.add_many_unchecked(&[plate("D"), plate("D")]).await;
    assert!(matches!(repeated, Err(Error::Constraint(_))));
    assert_eq!(ledger.len().await, 1);
}

#[tokio::test]
async fn record_moves_pending_once() {
    let ledger = MemoryLedger::new();
    let key = PlateKey::new("AA", "NY");
    ledger.add_one(&NewPlate::new(key.clone())).await.unwrap();

    let done = Completion::done(key.clone(), Amount::from_cents(1250));
    assert!(ledger.record(&done).await.unwrap());

    // A duplicate attempt must not overwrite the first result.
    let late = Completion::error(key.clone(), "timeout");
    assert!(!ledger.record(&late).await.unwrap());

    let item = ledger.get(&key).await.unwrap().unwrap();
    assert_eq!(
        item.status,
        Status::Done {
            amount: Amount::from_cents(1250)
        }
    );
}

#[tokio::test]
async fn record_of_unknown_item_is_stale() {
    let ledger = MemoryLedger::new();
    let missing = Completion::done(PlateKey::new("NOPE", "NY"), Amount::ZERO);
    assert!(!ledger.record(&missing).await.unwrap());
    assert!(ledger.is_empty().await);
}

#[tokio::test]
async fn record_many_reports_applied() {
    let ledger = MemoryLedger::new();
    ledger.add_many(&[plate("A"), plate("B")]).await.unwrap();
    ledger
        .record(&Completion::error(PlateKey::new("B", "NY"), "boom"))
        .await
        .unwrap();

    let applied = ledger
        .record_many(&[
            Completion::done(PlateKey::new("A", "NY"), Amount::from_cents(100)),
            Completion::done(PlateKey::new("B", "NY"), Amount::from_cents(200)),
        ])
        .await
        .unwrap();
    assert_eq!(applied, 1);

    let counts = ledger.counts(Some("NY")).await.unwrap();
    assert_eq!(
        counts,
        StateCounts {
            pending: 0,
            done: 1,
            error: 1
        }
    );
}

#[tokio::test]
async fn fetch_pending_pages_by_identifier() {
    let ledger = MemoryLedger::new();
    ledger
        .add_many(&[plate("D"), plate("A"), plate("C"), plate("B")])
        .await
        .unwrap();
    ledger
        .add_one(&NewPlate::new(PlateKey::new("A", "NJ")))
        .await
        .unwrap();
    ledger
        .record(&Completion::done(PlateKey::new("B", "NY"), Amount::ZERO))
        .await
        .unwrap();

    let first = ledger.fetch_pending("NY", None, 2).await.unwrap();
    assert_eq!(first, vec!["A", "C"]);
    let rest = ledger.fetch_pending("NY", Some("C"), 2).await.unwrap();
    assert_eq!(rest, vec!["D"]);
    assert!(ledger.fetch_pending("NY", Some("D"), 2).await.unwrap().is_empty());
}

#[tokio::test]
async fn identifiers_in_state_snapshots_one_state() {
    let ledger = MemoryLedger::new();
    ledger
        .add_many(&[plate("A"), plate("B"), plate("C")])
        .await
        .unwrap();
    ledger
        .record(&Completion::done(PlateKey::new("A", "NY"), Amount::ZERO))
        .await
        .unwrap();
    ledger
        .record(&Completion::error(PlateKey::new("B", "NY"), "x"))
        .await
        .unwrap();

    let done = ledger.identifiers_in_state("NY", State::Done).await.unwrap();
    assert_eq!(done.len(), 1);
    assert!(done.contains("A"));
    assert!(
        ledger
            .identifiers_in_state("NJ", State::Done)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn purge_removes_sentinel_in_every_jurisdiction() {
    let ledger = MemoryLedger::new();
    ledger.add_one(&plate("0")).await.unwrap();
    ledger
        .add_one(&NewPlate::new(PlateKey::new("0", "NJ")))
        .await
        .unwrap();
    ledger.add_one(&plate("A")).await.unwrap();

    assert_eq!(ledger.purge("0").await.unwrap(), 2);
    assert_eq!(ledger.len().await, 1);
    assert_eq!(ledger.purge("0").await.unwrap(), 0);
}

#[tokio::test]
async fn requeue_moves_errors_back_to_pending() {
    let ledger = MemoryLedger::new();
    ledger.add_many(&[plate("A"), plate("B")]).await.unwrap();
    ledger
        .record(&Completion::error(PlateKey::new("A", "NY"), "blocked"))
        .await
        .unwrap();
    ledger
        .record(&Completion::done(PlateKey::new("B", "NY"), Amount::ZERO))
        .await
        .unwrap();

    assert_eq!(ledger.requeue_errors("NJ").await.unwrap(), 0);
    assert_eq!(ledger.requeue_errors("NY").await.unwrap(), 1);

    let item = ledger.get(&PlateKey::new("A", "NY")).await.unwrap().unwrap();
    assert_eq!(item.status, Status::Pending);
    assert_eq!(ledger.fetch_pending("NY", None, 10).await.unwrap(), vec!["A"]);
}

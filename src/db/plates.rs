//! Plate ledger on Postgres: pending inserts with dedup, guarded result
//! writes, snapshot-isolated batches, aggregates.

use super::Db;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::model::*;
use async_trait::async_trait;
use sqlx::{PgExecutor, Postgres, QueryBuilder, Transaction};
use std::collections::HashSet;

/// Rows per statement for unchecked bulk inserts (3 binds per row).
const BULK_CHUNK: usize = 1000;

impl Db {
    /// Open a transaction with snapshot reads and durable commit.
    async fn begin_snapshot(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;
        sqlx::query("SET LOCAL synchronous_commit = on")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

/// Insert a pending row unless the key exists. Returns `true` if it existed.
async fn add_one_on<'e, E: PgExecutor<'e>>(executor: E, add: &NewPlate) -> Result<bool> {
    let inserted: Option<(String,)> = sqlx::query_as(
        "INSERT INTO plates (identifier, jurisdiction, state, tag)
         VALUES ($1, $2, 'pending', $3)
         ON CONFLICT (jurisdiction, identifier) DO NOTHING
         RETURNING identifier",
    )
    .bind(&add.key.identifier)
    .bind(&add.key.jurisdiction)
    .bind(&add.tag)
    .fetch_optional(executor)
    .await
    .map_err(Error::from_store)?;
    Ok(inserted.is_none())
}

/// Guarded result write: only a pending row moves.
async fn record_on<'e, E: PgExecutor<'e>>(executor: E, completion: &Completion) -> Result<bool> {
    let (amount_cents, error) = match &completion.outcome {
        Outcome::Done(amount) => (Some(amount.cents()), None),
        Outcome::Error(message) => (None, Some(message.as_str())),
    };
    let rows_affected = sqlx::query(
        "UPDATE plates SET state = $1, amount_cents = $2, error = $3, updated_at = now()
         WHERE jurisdiction = $4 AND identifier = $5 AND state = 'pending'",
    )
    .bind(completion.outcome.state().as_str())
    .bind(amount_cents)
    .bind(error)
    .bind(&completion.key.jurisdiction)
    .bind(&completion.key.identifier)
    .execute(executor)
    .await
    .map_err(Error::from_store)?
    .rows_affected();
    Ok(rows_affected > 0)
}

#[async_trait]
impl Ledger for Db {
    async fn get(&self, key: &PlateKey) -> Result<Option<WorkItem>> {
        let row: Option<PlateRow> = sqlx::query_as(
            "SELECT identifier, jurisdiction, state, amount_cents, error, tag, created_at, updated_at
             FROM plates WHERE jurisdiction = $1 AND identifier = $2",
        )
        .bind(&key.jurisdiction)
        .bind(&key.identifier)
        .fetch_optional(self.pool())
        .await?;

        row.map(PlateRow::try_into_work_item).transpose()
    }

    async fn add_one(&self, add: &NewPlate) -> Result<bool> {
        add_one_on(self.pool(), add).await
    }

    async fn add_many(&self, adds: &[NewPlate]) -> Result<AddSummary> {
        let mut tx = self.begin_snapshot().await?;
        let mut summary = AddSummary::default();
        for add in adds {
            if add_one_on(&mut *tx, add).await? {
                summary.existed += 1;
            } else {
                summary.added += 1;
            }
        }
        // Dropping an uncommitted transaction rolls it back, so any `?` above
        // leaves nothing behind.
        tx.commit().await?;
        Ok(summary)
    }

    async fn add_many_unchecked(&self, adds: &[NewPlate]) -> Result<u64> {
        let mut inserted = 0;
        for chunk in adds.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO plates (identifier, jurisdiction, tag) ");
            qb.push_values(chunk, |mut row, add| {
                row.push_bind(&add.key.identifier)
                    .push_bind(&add.key.jurisdiction)
                    .push_bind(&add.tag);
            });
            inserted += qb
                .build()
                .execute(self.pool())
                .await
                .map_err(Error::from_store)?
                .rows_affected();
        }
        Ok(inserted)
    }

    async fn fetch_pending(
        &self,
        jurisdiction: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT identifier FROM plates
             WHERE jurisdiction = $1 AND state = 'pending'
             AND ($2::text IS NULL OR identifier > $2)
             ORDER BY identifier
             LIMIT $3",
        )
        .bind(jurisdiction)
        .bind(after)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(|(identifier,)| identifier).collect())
    }

    async fn record(&self, completion: &Completion) -> Result<bool> {
        record_on(self.pool(), completion).await
    }

    async fn record_many(&self, completions: &[Completion]) -> Result<u64> {
        let mut tx = self.begin_snapshot().await?;
        let mut applied = 0;
        for completion in completions {
            if record_on(&mut *tx, completion).await? {
                applied += 1;
            }
        }
        tx.commit().await?;
        Ok(applied)
    }

    async fn counts(&self, jurisdiction: Option<&str>) -> Result<StateCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT state, COUNT(*) FROM plates
             WHERE ($1::text IS NULL OR jurisdiction = $1)
             GROUP BY state",
        )
        .bind(jurisdiction)
        .fetch_all(self.pool())
        .await?;

        let mut counts = StateCounts::default();
        for (state, n) in rows {
            counts.set(state.parse()?, n.max(0) as u64);
        }
        Ok(counts)
    }

    async fn identifiers_in_state(
        &self,
        jurisdiction: &str,
        state: State,
    ) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT identifier FROM plates WHERE jurisdiction = $1 AND state = $2")
                .bind(jurisdiction)
                .bind(state.as_str())
                .fetch_all(self.pool())
                .await?;

        Ok(rows.into_iter().map(|(identifier,)| identifier).collect())
    }

    async fn purge(&self, identifier: &str) -> Result<u64> {
        let rows_affected = sqlx::query("DELETE FROM plates WHERE identifier = $1")
            .bind(identifier)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(rows_affected)
    }

    async fn requeue_errors(&self, jurisdiction: &str) -> Result<u64> {
        let rows_affected = sqlx::query(
            "UPDATE plates SET state = 'pending', error = NULL, updated_at = now()
             WHERE jurisdiction = $1 AND state = 'error'",
        )
        .bind(jurisdiction)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows_affected)
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct PlateRow {
    identifier: String,
    jurisdiction: String,
    state: String,
    amount_cents: Option<i64>,
    error: Option<String>,
    tag: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl PlateRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        let status = match self.state.parse()? {
            State::Pending => Status::Pending,
            State::Done => Status::Done {
                amount: Amount::from_cents(self.amount_cents.ok_or_else(|| {
                    Error::Other(format!("done row {} has no amount", self.identifier))
                })?),
            },
            State::Error => Status::Error {
                message: self.error.unwrap_or_default(),
            },
        };

        Ok(WorkItem {
            key: PlateKey::new(self.identifier, self.jurisdiction),
            status,
            tag: self.tag,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

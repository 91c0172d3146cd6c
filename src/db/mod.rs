//! Database connection pool, migrations, and health check.
//!
//! The Postgres handle is the production [`crate::ledger::Ledger`]; its
//! implementation lives in [`plates`].

pub mod plates;

use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool shared by every worker.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a pool sized for `max_connections` concurrent callers.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await?;
        tracing::info!(max_connections, "connected to ledger database");
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

//! Error types for plateq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing run parameters. Fatal before any work starts.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A store-level constraint rejected a write (duplicate key, empty key part, ...).
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error(transparent)]
    Lookup(#[from] crate::lookup::LookupError),

    #[error("ingest error: {0}")]
    Ingest(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map a driver error, folding database constraint violations into [`Error::Constraint`].
    pub(crate) fn from_store(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db)
                if db.is_unique_violation() || db.is_check_violation() =>
            {
                Error::Constraint(db.message().to_string())
            }
            _ => Error::Store(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

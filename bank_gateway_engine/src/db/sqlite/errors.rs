use thiserror::Error;

use crate::{db_types::ConversionError, traits::StoreError};

#[derive(Debug, Error)]
pub enum SqliteDatabaseError {
    #[error("Database connection error: {0}")]
    DriverError(#[from] sqlx::Error),
    #[error("Could not run database migrations: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("Database query error: {0}")]
    QueryError(String),
    #[error("Order {0} was modified concurrently")]
    VersionConflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Invalid stored value. {0}")]
    Conversion(#[from] ConversionError),
}

impl From<SqliteDatabaseError> for StoreError {
    fn from(e: SqliteDatabaseError) -> Self {
        match e {
            SqliteDatabaseError::DriverError(e) => match e {
                sqlx::Error::RowNotFound => StoreError::NotFound(e.to_string()),
                sqlx::Error::PoolTimedOut |
                sqlx::Error::PoolClosed |
                sqlx::Error::Io(_) |
                sqlx::Error::Tls(_) |
                sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
                other => StoreError::Backend(other.to_string()),
            },
            SqliteDatabaseError::VersionConflict(code) => StoreError::Conflict(code),
            SqliteDatabaseError::NotFound(what) => StoreError::NotFound(what),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

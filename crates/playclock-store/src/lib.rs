//! Persistence layer for playclockd
//!
//! Provides:
//! - Device catalog (id, name, kind, connectivity)
//! - Session records (current and historical; rows are never deleted)
//! - Health check

mod sqlite;
mod traits;

pub use sqlite::*;
pub use traits::*;

use playclock_util::PlayclockError;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for PlayclockError {
    fn from(e: StoreError) -> Self {
        PlayclockError::store(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

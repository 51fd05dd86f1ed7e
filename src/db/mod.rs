//! Job record storage.
//!
//! Records are kept either as one JSON file per job or in SQLite. Both
//! backends hold the same JSON document that the retrieval endpoint returns.

mod file;
mod models;
mod store;

pub use file::*;
pub use models::*;
pub use store::*;

use thiserror::Error;

/// Storage error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Not found")]
    NotFound,
    #[error("job {0} already has a terminal record")]
    AlreadyFinal(JobId),
    #[error("record for job {0} is not terminal")]
    NotTerminal(JobId),
}

/// Keyed storage for job records.
///
/// A record is written once as pending and once more with its terminal
/// outcome. Readers never observe a partially written record.
pub trait JobStore: Send + Sync {
    /// Write the pending record for `id`, replacing anything under that key.
    fn create(&self, id: &JobId) -> Result<(), StoreError>;

    /// Replace the pending record for `id` with a terminal one.
    fn finalize(&self, id: &JobId, record: &JobRecord) -> Result<(), StoreError>;

    /// The stored record text for `id`, exactly as it was written.
    fn read_raw(&self, id: &JobId) -> Result<String, StoreError>;

    fn read(&self, id: &JobId) -> Result<JobRecord, StoreError> {
        Ok(serde_json::from_str(&self.read_raw(id)?)?)
    }
}

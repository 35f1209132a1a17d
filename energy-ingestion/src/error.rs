use crate::partition::PartitionError;
use crate::store::StorageError;

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    NotFound(String),
}

/// A batch stopped at a failing chunk. Chunks before it stay committed.
#[derive(thiserror::Error, Debug)]
#[error(
    "batch aborted after {committed_chunks} committed chunk(s) ({committed_records} records): {source}"
)]
pub struct BatchError {
    pub committed_chunks: usize,
    pub committed_records: usize,
    #[source]
    pub source: TelemetryError,
}

impl BatchError {
    /// Failure before any chunk was attempted.
    pub fn before_commit(source: impl Into<TelemetryError>) -> Self {
        Self {
            committed_chunks: 0,
            committed_records: 0,
            source: source.into(),
        }
    }
}

use graphbulk_schema::SchemaError;
use graphbulk_store::StoreError;
use thiserror::Error;

/// Outcome of a single failed unit of work.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ItemError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

impl From<StoreError> for ItemError {
    fn from(err: StoreError) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Failure of a bulk operation as a whole.
///
/// Per-item failures never surface here; they are recorded on the job.
#[derive(Debug, Error)]
pub enum BulkError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BulkError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

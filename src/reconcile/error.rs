use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The scope could not be enumerated. Fatal: raised before any mutation.
    #[error("Scope unavailable: {scope}: {reason}")]
    ScopeUnavailable { scope: String, reason: String },

    /// A whole batch was rejected by the store. Recorded per id by the
    /// mutator; only surfaces as an error when a caller asks for strictness.
    #[error("Batch mutation failed for {failed} of {attempted} records")]
    BatchMutationFailure { attempted: usize, failed: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconcileError {
    pub fn scope_unavailable(scope: impl ToString, reason: impl ToString) -> Self {
        Self::ScopeUnavailable {
            scope: scope.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

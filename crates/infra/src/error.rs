//! Infrastructure error model.

use thiserror::Error;

use consult_wallet::WalletError;

/// Storage-layer failure.
///
/// These are infrastructure errors, as opposed to the business rejections in
/// [`WalletError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A concurrent writer changed a wallet between read and write
    /// (version mismatch or duplicate wallet creation). Safe to retry.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("storage failure during {operation}: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    /// Rolling back a failed unit of work failed too; needs manual
    /// reconciliation.
    #[error("rollback failed after '{cause}': {rollback}")]
    RollbackFailed { cause: String, rollback: String },

    /// A persisted row could not be turned back into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn backend(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Failure of a wallet operation: either a business rejection or a storage
/// failure. Nothing was written in either case.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error(transparent)]
    Rejected(#[from] WalletError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl ProcessError {
    pub fn rejection(&self) -> Option<&WalletError> {
        match self {
            ProcessError::Rejected(e) => Some(e),
            ProcessError::Persistence(_) => None,
        }
    }
}

use rust_decimal::Decimal;
use thiserror::Error;

use consult_core::{Currency, DomainError, UserId};

use crate::ledger::TransactionStatus;

/// Business rejection raised by wallet operations.
///
/// Every variant is produced before any state is mutated; callers can surface
/// it directly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Amount is non-positive or exceeds the currency's precision.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Request is structurally invalid (missing bank details, wrong entry kind).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Decimal, requested: Decimal },

    /// Self-transfer or unknown recipient.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("currency mismatch: wallet holds {wallet}, operation uses {requested}")]
    CurrencyMismatch { wallet: Currency, requested: Currency },

    #[error("wallet of user '{0}' is inactive")]
    WalletInactive(UserId),

    #[error("invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// The record exists but belongs to another user.
    #[error("forbidden")]
    Forbidden,
}

impl WalletError {
    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn invalid_recipient(msg: impl Into<String>) -> Self {
        Self::InvalidRecipient(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl From<DomainError> for WalletError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => Self::InvalidAmount(msg),
            DomainError::InvalidId(msg) => Self::InvalidRequest(msg),
            DomainError::Conflict(msg) => Self::InvalidRequest(msg),
        }
    }
}

//! Wallet module (per-user balances + append-only ledger entries).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns. Every
//! balance change is produced together with the ledger entry that records it.

pub mod error;
pub mod ledger;
pub mod operation;
pub mod wallet;

pub use error::WalletError;
pub use ledger::{
    BankDetails, EntryDraft, EntryLinks, LedgerEntry, RestoredEntry, SettlementOutcome,
    TransactionKind, TransactionStatus,
};
pub use operation::{
    CreditRequest, DebitRequest, RefundRequest, TransferRequest, WalletOperation,
    WithdrawRequest,
};
pub use wallet::{GetOrCreate, RestoredWallet, Wallet, transfer};

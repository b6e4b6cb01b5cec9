//! Infrastructure layer: persistence, the transaction processor, read queries
//! and configuration.

pub mod config;
pub mod directory;
pub mod error;
pub mod processor;
pub mod query;
pub mod store;

pub use config::{ConfigError, WalletConfig};
pub use directory::{InMemoryUserDirectory, UserDirectory};
#[cfg(feature = "postgres")]
pub use directory::PostgresUserDirectory;
pub use error::{ProcessError, StoreError};
pub use processor::{Receipt, TransactionProcessor};
pub use query::{BalanceQueryService, BalanceView};
pub use store::{
    Committed, InMemoryWalletStore, LockScope, Page, Pagination, PaginationMeta,
    TransactionFilter, WalletStore, WorkingSet,
};
#[cfg(feature = "postgres")]
pub use store::PostgresWalletStore;

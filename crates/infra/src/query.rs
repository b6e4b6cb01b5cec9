//! Read side: balances and ledger history.

use rust_decimal::Decimal;
use serde::Serialize;

use consult_core::{Currency, TransactionId, UserId};
use consult_wallet::{LedgerEntry, Wallet, WalletError};

use crate::config::WalletConfig;
use crate::error::ProcessError;
use crate::store::{Page, Pagination, TransactionFilter, WalletStore};

/// Balance summary of one user. A user without a wallet gets a zeroed view
/// with `exists = false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceView {
    pub user_id: UserId,
    pub balance: Decimal,
    pub currency: Currency,
    pub total_earned: Decimal,
    pub total_spent: Decimal,
    pub pending_withdrawals: Decimal,
    pub is_active: bool,
    pub exists: bool,
}

impl BalanceView {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            currency: Currency::Usd,
            total_earned: Decimal::ZERO,
            total_spent: Decimal::ZERO,
            pending_withdrawals: Decimal::ZERO,
            is_active: true,
            exists: false,
        }
    }
}

impl From<&Wallet> for BalanceView {
    fn from(w: &Wallet) -> Self {
        Self {
            user_id: w.user_id().clone(),
            balance: w.balance(),
            currency: w.currency(),
            total_earned: w.total_earned(),
            total_spent: w.total_spent(),
            pending_withdrawals: w.pending_withdrawals(),
            is_active: w.is_active(),
            exists: true,
        }
    }
}

pub struct BalanceQueryService<S> {
    store: S,
    config: WalletConfig,
}

impl<S: WalletStore> BalanceQueryService<S> {
    pub fn new(store: S, config: WalletConfig) -> Self {
        Self { store, config }
    }

    /// Never fails for a missing wallet.
    pub async fn get_balance(&self, user: &UserId) -> Result<BalanceView, ProcessError> {
        let wallet = self.store.load_wallet(user).await?;
        Ok(wallet
            .as_ref()
            .map(BalanceView::from)
            .unwrap_or_else(|| BalanceView::empty(user.clone())))
    }

    /// History of `user`, newest first. `page` / `page_size` are normalized
    /// (page 0 means 1, size clamped to the configured maximum).
    pub async fn list_transactions(
        &self,
        user: &UserId,
        filter: &TransactionFilter,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<Page<LedgerEntry>, ProcessError> {
        let pagination = Pagination::new(
            page,
            page_size,
            self.config.default_page_size,
            self.config.max_page_size,
        );
        Ok(self.store.query_entries(user, filter, pagination).await?)
    }

    pub async fn get_transaction(
        &self,
        user: &UserId,
        id: &TransactionId,
    ) -> Result<LedgerEntry, ProcessError> {
        let entry = self
            .store
            .load_entry(id)
            .await?
            .ok_or_else(|| WalletError::not_found(format!("transaction {id}")))?;
        if !entry.belongs_to(user) {
            return Err(WalletError::Forbidden.into());
        }
        Ok(entry)
    }
}

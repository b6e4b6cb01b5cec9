//! Transaction processor: the single entry point for money movement.
//!
//! Every operation follows the same pipeline:
//!
//! ```text
//! request
//!   ↓
//! 1. stateless validation (amount, recipient, bank details)
//!   ↓
//! 2. store.apply(scope, mutation): lock wallets in sorted order, load,
//!    run the domain method on copies, commit wallet + entries atomically
//!   ↓
//! 3. retry the whole unit of work on a concurrent-modification conflict
//! ```
//!
//! Business rejections are logged at `info`, persistence failures at `warn`.
//! Nothing is written when either happens.

use tracing::{debug, info, instrument, warn};

use consult_core::{Currency, Money, TransactionId, UserId};
use consult_wallet::{
    transfer, CreditRequest, DebitRequest, EntryDraft, EntryLinks, GetOrCreate, LedgerEntry,
    RefundRequest, SettlementOutcome, TransferRequest, Wallet, WalletError, WalletOperation,
    WithdrawRequest,
};

use crate::config::WalletConfig;
use crate::directory::UserDirectory;
use crate::error::{ProcessError, StoreError};
use crate::store::{Committed, LockScope, Mutation, WalletStore, WorkingSet};

/// What a committed operation produced.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub operation: &'static str,
    /// Entries written or settled, in the order they were recorded.
    pub entries: Vec<LedgerEntry>,
    /// Post-commit state of every wallet involved.
    pub wallets: Vec<Wallet>,
    /// Users whose wallet was opened by this operation.
    pub created: Vec<UserId>,
}

impl Receipt {
    fn from_committed(operation: &'static str, committed: Committed) -> Self {
        let mut entries = committed.appended;
        entries.extend(committed.updated);
        Self {
            operation,
            entries,
            wallets: committed.wallets,
            created: committed.created,
        }
    }

    /// First entry of the operation (the sender leg for transfers).
    pub fn entry(&self) -> Option<&LedgerEntry> {
        self.entries.first()
    }

    pub fn wallet(&self, user: &UserId) -> Option<&Wallet> {
        self.wallets.iter().find(|w| w.user_id() == user)
    }
}

pub struct TransactionProcessor<S, D> {
    store: S,
    directory: D,
    config: WalletConfig,
}

impl<S, D> TransactionProcessor<S, D>
where
    S: WalletStore,
    D: UserDirectory,
{
    pub fn new(store: S, directory: D, config: WalletConfig) -> Self {
        Self {
            store,
            directory,
            config,
        }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Dispatch a tagged operation to its handler.
    pub async fn execute(&self, operation: WalletOperation) -> Result<Receipt, ProcessError> {
        match operation {
            WalletOperation::Credit(req) => self.credit(req).await,
            WalletOperation::Debit(req) => self.debit(req).await,
            WalletOperation::Withdraw(req) => self.withdraw(req).await,
            WalletOperation::Transfer(req) => self.transfer(req).await,
            WalletOperation::Refund(req) => self.refund(req).await,
        }
    }

    #[instrument(skip(self, req), fields(user = %req.user_id, amount = %req.amount, currency = %req.currency))]
    pub async fn credit(&self, req: CreditRequest) -> Result<Receipt, ProcessError> {
        let op = WalletOperation::Credit(req.clone());
        self.validate(&op)?;

        let draft = EntryDraft::new(describe(&req.description, "Wallet top-up"))
            .with_method(req.method.clone())
            .with_links(EntryLinks {
                payment_id: req.payment_id.clone(),
                ..EntryLinks::default()
            });
        let money = Money::new(req.amount, req.currency);

        let mutation = |ws: &mut WorkingSet| -> Result<(), WalletError> {
            let now = ws.now();
            let wallet = ws.get_or_create(&req.user_id, req.currency)?.into_inner();
            let entry = wallet.credit(money, draft.clone(), now)?;
            ws.append(entry);
            Ok(())
        };
        self.run(&op, LockScope::new(op.wallets()), &mutation).await
    }

    #[instrument(skip(self, req), fields(user = %req.user_id, amount = %req.amount))]
    pub async fn debit(&self, req: DebitRequest) -> Result<Receipt, ProcessError> {
        let op = WalletOperation::Debit(req.clone());
        self.validate(&op)?;

        let draft = EntryDraft::new(describe(&req.description, "Consultation payment"))
            .with_method(Some("wallet".to_string()))
            .with_links(EntryLinks {
                consultation_id: req.consultation_id.clone(),
                ..EntryLinks::default()
            });
        let currency = self.config.default_currency;

        let mutation = |ws: &mut WorkingSet| -> Result<(), WalletError> {
            let now = ws.now();
            let wallet = ws.get_or_create(&req.user_id, currency)?.into_inner();
            let entry = wallet.debit(req.amount, draft.clone(), now)?;
            ws.append(entry);
            Ok(())
        };
        self.run(&op, LockScope::new(op.wallets()), &mutation).await
    }

    #[instrument(skip(self, req), fields(user = %req.user_id, amount = %req.amount))]
    pub async fn withdraw(&self, req: WithdrawRequest) -> Result<Receipt, ProcessError> {
        let op = WalletOperation::Withdraw(req.clone());
        self.validate(&op)?;

        let draft = EntryDraft::new(describe(&req.description, "Withdrawal request"))
            .with_method(Some(
                req.method.clone().unwrap_or_else(|| "bank_transfer".to_string()),
            ))
            .with_bank_details(req.bank_details.clone());
        let currency = self.config.default_currency;

        let mutation = |ws: &mut WorkingSet| -> Result<(), WalletError> {
            let now = ws.now();
            let wallet = ws.get_or_create(&req.user_id, currency)?.into_inner();
            let entry = wallet.withdraw(req.amount, draft.clone(), now)?;
            ws.append(entry);
            Ok(())
        };
        self.run(&op, LockScope::new(op.wallets()), &mutation).await
    }

    #[instrument(skip(self, req), fields(from = %req.from, to = %req.to, amount = %req.amount))]
    pub async fn transfer(&self, req: TransferRequest) -> Result<Receipt, ProcessError> {
        let op = WalletOperation::Transfer(req.clone());
        self.validate(&op)?;

        if !self.directory.exists(&req.to).await? {
            let err = WalletError::invalid_recipient(format!("recipient '{}' does not exist", req.to));
            info!(operation = op.name(), error = %err, "wallet operation rejected");
            return Err(err.into());
        }

        let description = describe(&req.description, "Wallet transfer");
        let default_currency = self.config.default_currency;

        let mutation = |ws: &mut WorkingSet| -> Result<(), WalletError> {
            let now = ws.now();
            // A recipient without a wallet gets one in the sender's currency.
            let currency = ws
                .wallet(&req.from)
                .map(Wallet::currency)
                .unwrap_or(default_currency);
            ws.get_or_create(&req.from, currency)?;
            ws.get_or_create(&req.to, currency)?;

            let (sender, recipient) = ws.pair_mut(&req.from, &req.to)?;
            let (sent, received) = transfer(sender, recipient, req.amount, &description, now)?;
            ws.append(sent);
            ws.append(received);
            Ok(())
        };
        self.run(&op, LockScope::new(op.wallets()), &mutation).await
    }

    #[instrument(skip(self, req), fields(user = %req.user_id, amount = %req.amount, payment = %req.related_payment_id))]
    pub async fn refund(&self, req: RefundRequest) -> Result<Receipt, ProcessError> {
        let op = WalletOperation::Refund(req.clone());
        self.validate(&op)?;

        let draft = EntryDraft::new(format!("Refund: {}", req.reason.trim()))
            .with_method(Some("wallet".to_string()))
            .with_links(EntryLinks {
                payment_id: Some(req.related_payment_id.clone()),
                ..EntryLinks::default()
            });
        let currency = self.config.default_currency;

        let mutation = |ws: &mut WorkingSet| -> Result<(), WalletError> {
            let now = ws.now();
            let wallet = ws.get_or_create(&req.user_id, currency)?.into_inner();
            let entry = wallet.refund(req.amount, draft.clone(), now)?;
            ws.append(entry);
            Ok(())
        };
        self.run(&op, LockScope::new(op.wallets()), &mutation).await
    }

    /// Persisted get-or-create. `currency` applies only when the wallet is new.
    #[instrument(skip(self, user), fields(user = %user))]
    pub async fn open_wallet(
        &self,
        user: &UserId,
        currency: Option<Currency>,
    ) -> Result<GetOrCreate<Wallet>, ProcessError> {
        let currency = currency.unwrap_or(self.config.default_currency);
        let mutation = |ws: &mut WorkingSet| -> Result<(), WalletError> {
            ws.get_or_create(user, currency)?;
            Ok(())
        };
        let committed = self
            .apply_with_retry("open_wallet", &LockScope::new([user.clone()]), &mutation)
            .await?;

        let created = committed.created.contains(user);
        let wallet = committed
            .wallet(user)
            .cloned()
            .ok_or_else(|| StoreError::Corrupt(format!("wallet of '{user}' missing after commit")))?;
        Ok(if created {
            GetOrCreate::Created(wallet)
        } else {
            GetOrCreate::Existing(wallet)
        })
    }

    /// Complete, fail or cancel a pending withdrawal.
    #[instrument(skip(self, outcome), fields(entry = %entry_id, status = outcome.target_status().as_str()))]
    pub async fn settle_withdrawal(
        &self,
        entry_id: TransactionId,
        outcome: SettlementOutcome,
    ) -> Result<Receipt, ProcessError> {
        if let SettlementOutcome::Failed { reason } = &outcome {
            if reason.trim().is_empty() {
                return Err(WalletError::invalid_request("failure reason is required").into());
            }
        }

        let owner = self
            .store
            .load_entry(&entry_id)
            .await?
            .map(|entry| entry.user_id().clone())
            .ok_or_else(|| WalletError::not_found(format!("transaction {entry_id}")))?;

        let mutation = |ws: &mut WorkingSet| -> Result<(), WalletError> {
            let now = ws.now();
            let (wallet, entry) = ws.wallet_and_entry_mut(&owner, &entry_id)?;
            wallet.settle_withdrawal(entry, outcome.clone(), now)
        };
        let scope = LockScope::new([owner.clone()]).with_entry(entry_id);
        let committed = self
            .apply_with_retry("settle_withdrawal", &scope, &mutation)
            .await?;
        Ok(Receipt::from_committed("settle_withdrawal", committed))
    }

    /// Deactivate or reactivate a wallet. Wallets are never deleted.
    #[instrument(skip(self, user), fields(user = %user))]
    pub async fn set_active(&self, user: &UserId, active: bool) -> Result<Wallet, ProcessError> {
        let mutation = |ws: &mut WorkingSet| -> Result<(), WalletError> {
            let now = ws.now();
            ws.wallet_mut(user)?.set_active(active, now);
            Ok(())
        };
        let committed = self
            .apply_with_retry("set_active", &LockScope::new([user.clone()]), &mutation)
            .await?;
        committed
            .wallet(user)
            .cloned()
            .ok_or_else(|| StoreError::Corrupt(format!("wallet of '{user}' missing after commit")).into())
    }

    fn validate(&self, op: &WalletOperation) -> Result<(), ProcessError> {
        op.validate().map_err(|err| {
            info!(operation = op.name(), error = %err, "wallet operation rejected");
            ProcessError::Rejected(err)
        })
    }

    async fn run(
        &self,
        op: &WalletOperation,
        scope: LockScope,
        mutation: &Mutation<'_>,
    ) -> Result<Receipt, ProcessError> {
        let committed = self.apply_with_retry(op.name(), &scope, mutation).await?;
        info!(
            operation = op.name(),
            amount = %op.amount(),
            entries = committed.appended.len(),
            "wallet operation committed"
        );
        Ok(Receipt::from_committed(op.name(), committed))
    }

    async fn apply_with_retry(
        &self,
        operation: &'static str,
        scope: &LockScope,
        mutation: &Mutation<'_>,
    ) -> Result<Committed, ProcessError> {
        let mut attempt = 0u32;
        loop {
            match self.store.apply(scope, mutation).await {
                Ok(committed) => return Ok(committed),
                Err(ProcessError::Persistence(err))
                    if err.is_retryable() && attempt < self.config.conflict_retries =>
                {
                    attempt += 1;
                    debug!(operation, attempt, error = %err, "retrying after conflict");
                }
                Err(ProcessError::Rejected(err)) => {
                    info!(operation, error = %err, "wallet operation rejected");
                    return Err(ProcessError::Rejected(err));
                }
                Err(ProcessError::Persistence(err)) => {
                    warn!(operation, attempts = attempt + 1, error = %err, "wallet operation failed to persist");
                    return Err(ProcessError::Persistence(err));
                }
            }
        }
    }
}

fn describe(description: &Option<String>, fallback: &str) -> String {
    description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

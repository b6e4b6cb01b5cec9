use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use consult_core::{AggregateRoot, TransactionId, UserId};
use consult_wallet::{LedgerEntry, Wallet};

use super::{
    Changes, Committed, LockScope, Mutation, Page, Pagination, PaginationMeta, TransactionFilter,
    WalletStore, WorkingSet,
};
use crate::error::{ProcessError, StoreError};

#[derive(Debug, Default)]
struct State {
    wallets: HashMap<UserId, Wallet>,
    /// Per-user ledgers in append order.
    ledgers: HashMap<UserId, Vec<LedgerEntry>>,
    /// Entry id -> (owner, position in the owner's ledger).
    index: HashMap<TransactionId, (UserId, usize)>,
}

/// In-memory wallet store.
///
/// Intended for tests/dev. Each wallet has its own async lock; a unit of work
/// holds the locks of its scope (acquired in sorted order) from load until
/// commit, so operations on disjoint wallets run in parallel.
#[derive(Debug, Default)]
pub struct InMemoryWalletStore {
    locks: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
    state: RwLock<State>,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_handles(&self, users: &[UserId]) -> Result<Vec<Arc<AsyncMutex<()>>>, StoreError> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(users
            .iter()
            .map(|u| Arc::clone(locks.entry(u.clone()).or_default()))
            .collect())
    }

    /// Drop the lock slots nobody else is holding or waiting on.
    fn release_handles(&self, users: &[UserId]) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        for user in users {
            if locks.get(user).is_some_and(|h| Arc::strong_count(h) == 1) {
                locks.remove(user);
            }
        }
    }

    fn run_locked(
        &self,
        scope: &LockScope,
        mutation: &Mutation<'_>,
    ) -> Result<Committed, ProcessError> {
        let mut working = self.load(scope)?;
        mutation(&mut working)?;
        let changes = working.into_changes();
        if !changes.is_empty() {
            self.commit(&changes)?;
        }
        Ok(changes.into_committed())
    }

    fn load(&self, scope: &LockScope) -> Result<WorkingSet, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        let wallets: Vec<(UserId, Option<Wallet>)> = scope
            .users()
            .iter()
            .map(|u| (u.clone(), state.wallets.get(u).cloned()))
            .collect();
        let entries: Vec<LedgerEntry> = scope
            .entries()
            .iter()
            .filter_map(|id| state.entry(id).cloned())
            .collect();
        Ok(WorkingSet::load(Utc::now(), wallets, entries))
    }

    fn commit(&self, changes: &Changes) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;

        // The scope locks make conflicts impossible here; checked anyway so a
        // lock bug shows up as an error instead of a lost update.
        for write in &changes.writes {
            let actual = state.wallets.get(write.wallet.user_id()).map(|w| w.version());
            write
                .expected
                .check(actual)
                .map_err(|e| StoreError::Conflict(e.to_string()))?;
        }

        for write in &changes.writes {
            state
                .wallets
                .insert(write.wallet.user_id().clone(), write.wallet.clone());
        }
        for entry in &changes.appended {
            let ledger = state.ledgers.entry(entry.user_id().clone()).or_default();
            ledger.push(entry.clone());
            let position = ledger.len() - 1;
            state
                .index
                .insert(entry.id_typed(), (entry.user_id().clone(), position));
        }
        for entry in &changes.updated {
            let slot = state
                .entry_mut(&entry.id_typed())
                .ok_or_else(|| StoreError::Corrupt(format!("entry {} vanished", entry.id_typed())))?;
            *slot = entry.clone();
        }
        Ok(())
    }
}

impl State {
    fn entry(&self, id: &TransactionId) -> Option<&LedgerEntry> {
        let (user, position) = self.index.get(id)?;
        self.ledgers.get(user)?.get(*position)
    }

    fn entry_mut(&mut self, id: &TransactionId) -> Option<&mut LedgerEntry> {
        let (user, position) = self.index.get(id)?;
        self.ledgers.get_mut(user)?.get_mut(*position)
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn apply(
        &self,
        scope: &LockScope,
        mutation: &Mutation<'_>,
    ) -> Result<Committed, ProcessError> {
        let handles = self.lock_handles(scope.users())?;
        let mut guards: Vec<OwnedMutexGuard<()>> = Vec::with_capacity(handles.len());
        for handle in handles {
            guards.push(handle.lock_owned().await);
        }

        let outcome = self.run_locked(scope, mutation);
        drop(guards);
        self.release_handles(scope.users());
        outcome
    }

    async fn load_wallet(&self, user: &UserId) -> Result<Option<Wallet>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.wallets.get(user).cloned())
    }

    async fn load_entry(&self, id: &TransactionId) -> Result<Option<LedgerEntry>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.entry(id).cloned())
    }

    async fn query_entries(
        &self,
        user: &UserId,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<Page<LedgerEntry>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        let matching: Vec<&LedgerEntry> = state
            .ledgers
            .get(user)
            .map(|ledger| ledger.iter().rev().filter(|e| filter.matches(e)).collect())
            .unwrap_or_default();

        let total = matching.len() as u64;
        let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(pagination.limit as usize)
            .cloned()
            .collect();
        Ok(Page {
            items,
            meta: PaginationMeta::new(pagination, total),
        })
    }
}

#[cfg(test)]
impl InMemoryWalletStore {
    fn expected_for(&self, user: &UserId) -> consult_core::ExpectedVersion {
        use consult_core::ExpectedVersion;
        match self.state.read().ok().and_then(|s| s.wallets.get(user).map(|w| w.version())) {
            Some(v) => ExpectedVersion::Exact(v),
            None => ExpectedVersion::NoRecord,
        }
    }

    fn lock_slots(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or_default()
    }
}

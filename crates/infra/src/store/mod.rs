//! Persistence boundary for wallets and their ledgers.
//!
//! A wallet operation is expressed as a [`Mutation`] over a [`WorkingSet`]:
//! the store locks every wallet in the [`LockScope`] (in sorted order), loads
//! them, runs the mutation on copies, and commits the resulting changes
//! atomically only when the mutation returns `Ok`. A rejected mutation leaves
//! no trace.

pub mod filter;
pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use consult_core::{AggregateRoot, Currency, ExpectedVersion, TransactionId, UserId};
use consult_wallet::{GetOrCreate, LedgerEntry, Wallet, WalletError};

use crate::error::{ProcessError, StoreError};

pub use filter::{Page, Pagination, PaginationMeta, TransactionFilter};
pub use in_memory::InMemoryWalletStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresWalletStore;

/// Wallets (and ledger entries) a unit of work needs exclusive access to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockScope {
    users: Vec<UserId>,
    entries: Vec<TransactionId>,
}

impl LockScope {
    pub fn new(users: impl IntoIterator<Item = UserId>) -> Self {
        let mut users: Vec<UserId> = users.into_iter().collect();
        users.sort();
        users.dedup();
        Self {
            users,
            entries: Vec::new(),
        }
    }

    pub fn with_entry(mut self, entry: TransactionId) -> Self {
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
        self
    }

    /// Users in lock-acquisition order (sorted, no duplicates).
    pub fn users(&self) -> &[UserId] {
        &self.users
    }

    pub fn entries(&self) -> &[TransactionId] {
        &self.entries
    }
}

#[derive(Debug)]
struct WalletSlot {
    wallet: Option<Wallet>,
    persisted_version: Option<u64>,
}

#[derive(Debug)]
struct EntrySlot {
    original: LedgerEntry,
    current: LedgerEntry,
}

/// Locked view of the wallets in a [`LockScope`].
///
/// Wallets outside the scope are invisible: they read as absent and cannot be
/// created.
#[derive(Debug)]
pub struct WorkingSet {
    now: DateTime<Utc>,
    wallets: BTreeMap<UserId, WalletSlot>,
    entries: BTreeMap<TransactionId, EntrySlot>,
    appended: Vec<LedgerEntry>,
}

impl WorkingSet {
    /// Build a working set from freshly loaded state. `wallets` must hold one
    /// item per scoped user (with `None` for users without a wallet).
    pub fn load(
        now: DateTime<Utc>,
        wallets: impl IntoIterator<Item = (UserId, Option<Wallet>)>,
        entries: impl IntoIterator<Item = LedgerEntry>,
    ) -> Self {
        let wallets = wallets
            .into_iter()
            .map(|(user, wallet)| {
                let persisted_version = wallet.as_ref().map(|w| w.version());
                (
                    user,
                    WalletSlot {
                        wallet,
                        persisted_version,
                    },
                )
            })
            .collect();
        let entries = entries
            .into_iter()
            .map(|entry| {
                (
                    entry.id_typed(),
                    EntrySlot {
                        original: entry.clone(),
                        current: entry,
                    },
                )
            })
            .collect();
        Self {
            now,
            wallets,
            entries,
            appended: Vec::new(),
        }
    }

    /// Timestamp shared by every change in this unit of work.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn wallet(&self, user: &UserId) -> Option<&Wallet> {
        self.wallets.get(user).and_then(|s| s.wallet.as_ref())
    }

    pub fn wallet_mut(&mut self, user: &UserId) -> Result<&mut Wallet, WalletError> {
        self.wallets
            .get_mut(user)
            .and_then(|s| s.wallet.as_mut())
            .ok_or_else(|| WalletError::not_found(format!("wallet of '{user}'")))
    }

    /// The user's wallet, opening one in `currency` if it does not exist yet.
    pub fn get_or_create(
        &mut self,
        user: &UserId,
        currency: Currency,
    ) -> Result<GetOrCreate<&mut Wallet>, WalletError> {
        let now = self.now;
        let slot = self.wallets.get_mut(user).ok_or_else(|| {
            WalletError::invalid_request(format!("wallet of '{user}' is not part of this operation"))
        })?;
        let created = slot.wallet.is_none();
        let wallet = slot
            .wallet
            .get_or_insert_with(|| Wallet::open(user.clone(), currency, now));
        Ok(if created {
            GetOrCreate::Created(wallet)
        } else {
            GetOrCreate::Existing(wallet)
        })
    }

    /// Two distinct wallets, mutably, in the order requested.
    pub fn pair_mut(
        &mut self,
        a: &UserId,
        b: &UserId,
    ) -> Result<(&mut Wallet, &mut Wallet), WalletError> {
        if a == b {
            return Err(WalletError::invalid_recipient("cannot transfer to yourself"));
        }
        let mut first = None;
        let mut second = None;
        for (user, slot) in self.wallets.iter_mut() {
            if user == a {
                first = slot.wallet.as_mut();
            } else if user == b {
                second = slot.wallet.as_mut();
            }
        }
        match (first, second) {
            (Some(x), Some(y)) => Ok((x, y)),
            (None, _) => Err(WalletError::not_found(format!("wallet of '{a}'"))),
            (_, None) => Err(WalletError::not_found(format!("wallet of '{b}'"))),
        }
    }

    pub fn entry(&self, id: &TransactionId) -> Option<&LedgerEntry> {
        self.entries.get(id).map(|s| &s.current)
    }

    /// A locked entry together with the wallet of `user`.
    pub fn wallet_and_entry_mut(
        &mut self,
        user: &UserId,
        id: &TransactionId,
    ) -> Result<(&mut Wallet, &mut LedgerEntry), WalletError> {
        let wallet = self
            .wallets
            .get_mut(user)
            .and_then(|s| s.wallet.as_mut())
            .ok_or_else(|| WalletError::not_found(format!("wallet of '{user}'")))?;
        let entry = self
            .entries
            .get_mut(id)
            .map(|s| &mut s.current)
            .ok_or_else(|| WalletError::not_found(format!("transaction {id}")))?;
        Ok((wallet, entry))
    }

    pub fn append(&mut self, entry: LedgerEntry) {
        self.appended.push(entry);
    }

    /// Reduce the working set to what actually has to be written.
    pub fn into_changes(self) -> Changes {
        let mut writes = Vec::new();
        let mut snapshot = Vec::new();
        for (_, slot) in self.wallets {
            let Some(wallet) = slot.wallet else { continue };
            let expected = match slot.persisted_version {
                None => Some(ExpectedVersion::NoRecord),
                Some(v) if v != wallet.version() => Some(ExpectedVersion::Exact(v)),
                Some(_) => None,
            };
            match expected {
                Some(expected) => writes.push(WalletWrite { wallet, expected }),
                None => snapshot.push(wallet),
            }
        }
        let updated = self
            .entries
            .into_values()
            .filter(|s| s.current != s.original)
            .map(|s| s.current)
            .collect();
        Changes {
            writes,
            untouched: snapshot,
            appended: self.appended,
            updated,
        }
    }
}

/// A wallet row to write, guarded by the version it was read at.
#[derive(Debug, Clone)]
pub struct WalletWrite {
    pub wallet: Wallet,
    pub expected: ExpectedVersion,
}

/// Everything a successful mutation produced.
#[derive(Debug, Clone)]
pub struct Changes {
    pub writes: Vec<WalletWrite>,
    /// Scoped wallets the mutation did not modify.
    pub untouched: Vec<Wallet>,
    pub appended: Vec<LedgerEntry>,
    pub updated: Vec<LedgerEntry>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.appended.is_empty() && self.updated.is_empty()
    }

    pub fn into_committed(self) -> Committed {
        let created = self
            .writes
            .iter()
            .filter(|w| w.expected == ExpectedVersion::NoRecord)
            .map(|w| w.wallet.user_id().clone())
            .collect();
        let mut wallets: Vec<Wallet> = self.writes.into_iter().map(|w| w.wallet).collect();
        wallets.extend(self.untouched);
        wallets.sort_by(|a, b| a.user_id().cmp(b.user_id()));
        Committed {
            wallets,
            appended: self.appended,
            updated: self.updated,
            created,
        }
    }
}

/// Post-commit state of a unit of work.
#[derive(Debug, Clone, Default)]
pub struct Committed {
    /// Every scoped wallet that exists after the commit, sorted by user.
    pub wallets: Vec<Wallet>,
    pub appended: Vec<LedgerEntry>,
    pub updated: Vec<LedgerEntry>,
    /// Users whose wallet was created by this unit of work.
    pub created: Vec<UserId>,
}

impl Committed {
    pub fn wallet(&self, user: &UserId) -> Option<&Wallet> {
        self.wallets.iter().find(|w| w.user_id() == user)
    }
}

/// A unit of work. Must be repeatable: stores may run it again after a
/// concurrent-modification conflict.
pub type Mutation<'a> = dyn Fn(&mut WorkingSet) -> Result<(), WalletError> + Send + Sync + 'a;

/// Storage for wallets and ledger entries.
///
/// `apply` is the only write path; it guarantees that the wallets in scope are
/// not modified by anyone else between load and commit, and that either every
/// change of the mutation is persisted or none is.
#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn apply(
        &self,
        scope: &LockScope,
        mutation: &Mutation<'_>,
    ) -> Result<Committed, ProcessError>;

    async fn load_wallet(&self, user: &UserId) -> Result<Option<Wallet>, StoreError>;

    async fn load_entry(&self, id: &TransactionId) -> Result<Option<LedgerEntry>, StoreError>;

    /// Ledger entries of `user`, newest first.
    async fn query_entries(
        &self,
        user: &UserId,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<Page<LedgerEntry>, StoreError>;
}

#[async_trait]
impl<S> WalletStore for Arc<S>
where
    S: WalletStore + ?Sized,
{
    async fn apply(
        &self,
        scope: &LockScope,
        mutation: &Mutation<'_>,
    ) -> Result<Committed, ProcessError> {
        (**self).apply(scope, mutation).await
    }

    async fn load_wallet(&self, user: &UserId) -> Result<Option<Wallet>, StoreError> {
        (**self).load_wallet(user).await
    }

    async fn load_entry(&self, id: &TransactionId) -> Result<Option<LedgerEntry>, StoreError> {
        (**self).load_entry(id).await
    }

    async fn query_entries(
        &self,
        user: &UserId,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<Page<LedgerEntry>, StoreError> {
        (**self).query_entries(user, filter, pagination).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consult_core::Money;
    use consult_wallet::EntryDraft;
    use rust_decimal_macros::dec;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[test]
    fn lock_scope_sorts_and_dedups() {
        let scope = LockScope::new([user("b"), user("a"), user("b")]);
        assert_eq!(scope.users(), &[user("a"), user("b")]);
    }

    #[test]
    fn created_wallets_are_written_as_new_records() {
        let mut ws = WorkingSet::load(Utc::now(), [(user("a"), None)], []);
        let created = ws.get_or_create(&user("a"), Currency::Usd).unwrap();
        assert!(created.is_created());

        let changes = ws.into_changes();
        assert_eq!(changes.writes.len(), 1);
        assert_eq!(changes.writes[0].expected, ExpectedVersion::NoRecord);
        assert_eq!(changes.into_committed().created, vec![user("a")]);
    }

    #[test]
    fn unchanged_wallets_are_not_rewritten() {
        let existing = Wallet::open(user("a"), Currency::Usd, Utc::now());
        let mut ws = WorkingSet::load(Utc::now(), [(user("a"), Some(existing))], []);
        assert!(!ws.get_or_create(&user("a"), Currency::Eur).unwrap().is_created());

        let changes = ws.into_changes();
        assert!(changes.is_empty());
        assert_eq!(changes.into_committed().wallets.len(), 1);
    }

    #[test]
    fn modified_wallet_is_guarded_by_its_loaded_version() {
        let mut existing = Wallet::open(user("a"), Currency::Usd, Utc::now());
        existing
            .credit(Money::new(dec!(5), Currency::Usd), EntryDraft::new("x"), Utc::now())
            .unwrap();
        let mut ws = WorkingSet::load(Utc::now(), [(user("a"), Some(existing))], []);
        let now = ws.now();
        let entry = ws
            .wallet_mut(&user("a"))
            .unwrap()
            .credit(Money::new(dec!(1), Currency::Usd), EntryDraft::new("y"), now)
            .unwrap();
        ws.append(entry);

        let changes = ws.into_changes();
        assert_eq!(changes.writes[0].expected, ExpectedVersion::Exact(1));
        assert_eq!(changes.appended.len(), 1);
    }

    #[test]
    fn wallets_outside_scope_cannot_be_created() {
        let mut ws = WorkingSet::load(Utc::now(), [(user("a"), None)], []);
        assert!(ws.get_or_create(&user("z"), Currency::Usd).is_err());
        assert!(ws.wallet(&user("z")).is_none());
    }

    #[test]
    fn pair_mut_returns_requested_order() {
        let mut ws = WorkingSet::load(
            Utc::now(),
            [
                (user("a"), Some(Wallet::open(user("a"), Currency::Usd, Utc::now()))),
                (user("b"), Some(Wallet::open(user("b"), Currency::Usd, Utc::now()))),
            ],
            [],
        );
        let (x, y) = ws.pair_mut(&user("b"), &user("a")).unwrap();
        assert_eq!(x.user_id(), &user("b"));
        assert_eq!(y.user_id(), &user("a"));
    }
}

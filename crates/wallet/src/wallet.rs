use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use consult_core::{AggregateRoot, Currency, Money, TransactionId, UserId};

use crate::error::WalletError;
use crate::ledger::{
    EntryDraft, LedgerEntry, SettlementOutcome, TransactionKind, TransactionStatus,
};

/// Result of a get-or-create lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOrCreate<T> {
    Existing(T),
    Created(T),
}

impl<T> GetOrCreate<T> {
    pub fn is_created(&self) -> bool {
        matches!(self, GetOrCreate::Created(_))
    }

    pub fn get(&self) -> &T {
        match self {
            GetOrCreate::Existing(v) | GetOrCreate::Created(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            GetOrCreate::Existing(v) | GetOrCreate::Created(v) => v,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> GetOrCreate<U> {
        match self {
            GetOrCreate::Existing(v) => GetOrCreate::Existing(f(v)),
            GetOrCreate::Created(v) => GetOrCreate::Created(f(v)),
        }
    }
}

/// Aggregate root: a user's cached balance.
///
/// The balance is a cache over the ledger: every method that moves money
/// returns the entry recording the movement, and the lifetime totals change in
/// the same call. `balance` never goes below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    user_id: UserId,
    balance: Decimal,
    currency: Currency,
    pending_withdrawals: Decimal,
    total_earned: Decimal,
    total_spent: Decimal,
    is_active: bool,
    last_transaction_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

/// Plain-data form of a persisted wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredWallet {
    pub user_id: UserId,
    pub balance: Decimal,
    pub currency: Currency,
    pub pending_withdrawals: Decimal,
    pub total_earned: Decimal,
    pub total_spent: Decimal,
    pub is_active: bool,
    pub last_transaction_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Wallet {
    /// A fresh, empty, active wallet (version 0 = never persisted).
    pub fn open(user_id: UserId, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            currency,
            pending_withdrawals: Decimal::ZERO,
            total_earned: Decimal::ZERO,
            total_spent: Decimal::ZERO,
            is_active: true,
            last_transaction_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn restore(r: RestoredWallet) -> Result<Self, WalletError> {
        if r.balance < Decimal::ZERO || r.pending_withdrawals < Decimal::ZERO {
            return Err(WalletError::invalid_request(format!(
                "stored wallet of '{}' has a negative balance",
                r.user_id
            )));
        }
        Ok(Self {
            user_id: r.user_id,
            balance: r.balance,
            currency: r.currency,
            pending_withdrawals: r.pending_withdrawals,
            total_earned: r.total_earned,
            total_spent: r.total_spent,
            is_active: r.is_active,
            last_transaction_at: r.last_transaction_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
            version: r.version,
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn pending_withdrawals(&self) -> Decimal {
        self.pending_withdrawals
    }

    pub fn total_earned(&self) -> Decimal {
        self.total_earned
    }

    pub fn total_spent(&self) -> Decimal {
        self.total_spent
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn last_transaction_at(&self) -> Option<DateTime<Utc>> {
        self.last_transaction_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Add funds from an external payment (card top-up, consultation payout).
    pub fn credit(
        &mut self,
        money: Money,
        draft: EntryDraft,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, WalletError> {
        self.ensure_active()?;
        self.ensure_currency(money.currency)?;
        self.ensure_amount(money.amount)?;

        let balance = raise(self.balance, money.amount)?;
        let total_earned = raise(self.total_earned, money.amount)?;
        self.balance = balance;
        self.total_earned = total_earned;
        Ok(self.record(
            TransactionKind::Credit,
            money.amount,
            TransactionStatus::Completed,
            draft,
            now,
        ))
    }

    /// Return funds of an earlier payment. Refunds are not earnings.
    pub fn refund(
        &mut self,
        amount: Decimal,
        draft: EntryDraft,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, WalletError> {
        self.ensure_active()?;
        self.ensure_amount(amount)?;

        self.balance = raise(self.balance, amount)?;
        Ok(self.record(
            TransactionKind::Refund,
            amount,
            TransactionStatus::Completed,
            draft,
            now,
        ))
    }

    /// Spend from the wallet (e.g. pay for a consultation).
    pub fn debit(
        &mut self,
        amount: Decimal,
        draft: EntryDraft,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, WalletError> {
        self.ensure_active()?;
        self.ensure_amount(amount)?;
        self.ensure_funds(amount)?;

        let total_spent = raise(self.total_spent, amount)?;
        self.balance = lower(self.balance, amount)?;
        self.total_spent = total_spent;
        Ok(self.record(
            TransactionKind::Debit,
            -amount,
            TransactionStatus::Completed,
            draft,
            now,
        ))
    }

    /// Request a payout. The balance drops immediately; the entry stays
    /// pending until the payout is settled.
    pub fn withdraw(
        &mut self,
        amount: Decimal,
        draft: EntryDraft,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, WalletError> {
        self.ensure_active()?;
        self.ensure_amount(amount)?;
        match &draft.bank_details {
            Some(bank) => bank.validate()?,
            None => return Err(WalletError::invalid_request("withdrawal requires bank details")),
        }
        self.ensure_funds(amount)?;

        let balance = lower(self.balance, amount)?;
        let pending = raise(self.pending_withdrawals, amount)?;
        let total_spent = raise(self.total_spent, amount)?;
        self.balance = balance;
        self.pending_withdrawals = pending;
        self.total_spent = total_spent;
        Ok(self.record(
            TransactionKind::Withdrawal,
            -amount,
            TransactionStatus::Pending,
            draft,
            now,
        ))
    }

    /// Settle a pending withdrawal of this wallet.
    ///
    /// Completing releases the pending amount; failing or cancelling puts the
    /// money back on the balance.
    pub fn settle_withdrawal(
        &mut self,
        entry: &mut LedgerEntry,
        outcome: SettlementOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), WalletError> {
        if !entry.belongs_to(&self.user_id) {
            return Err(WalletError::Forbidden);
        }
        if entry.kind() != TransactionKind::Withdrawal {
            return Err(WalletError::invalid_request(format!(
                "entry {} is a {}, not a withdrawal",
                entry.id_typed(),
                entry.kind().as_str()
            )));
        }

        let target = outcome.target_status();
        if entry.status().is_terminal() {
            return Err(WalletError::InvalidTransition {
                from: entry.status(),
                to: target,
            });
        }

        let amount = -entry.amount();
        if amount > self.pending_withdrawals {
            return Err(WalletError::invalid_request(format!(
                "pending withdrawals ({}) do not cover entry {}",
                self.pending_withdrawals,
                entry.id_typed()
            )));
        }

        let reason = match outcome {
            SettlementOutcome::Completed => None,
            SettlementOutcome::Failed { reason } => Some(reason),
            SettlementOutcome::Cancelled { reason } => reason,
        };
        let pending = lower(self.pending_withdrawals, amount)?;
        let (balance, total_spent) = if target == TransactionStatus::Completed {
            (self.balance, self.total_spent)
        } else {
            (raise(self.balance, amount)?, lower(self.total_spent, amount)?)
        };
        entry.transition(target, reason, now)?;

        self.pending_withdrawals = pending;
        self.balance = balance;
        self.total_spent = total_spent;
        self.touch(now);
        Ok(())
    }

    /// Flip the active flag. Returns whether anything changed.
    pub fn set_active(&mut self, active: bool, now: DateTime<Utc>) -> bool {
        if self.is_active == active {
            return false;
        }
        self.is_active = active;
        self.touch(now);
        true
    }

    fn record(
        &mut self,
        kind: TransactionKind,
        signed_amount: Decimal,
        status: TransactionStatus,
        draft: EntryDraft,
        now: DateTime<Utc>,
    ) -> LedgerEntry {
        self.last_transaction_at = Some(now);
        self.touch(now);
        LedgerEntry::record(
            TransactionId::new(),
            self.user_id.clone(),
            kind,
            signed_amount,
            self.currency,
            status,
            draft,
            self.balance,
            now,
        )
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }

    fn ensure_active(&self) -> Result<(), WalletError> {
        if self.is_active {
            Ok(())
        } else {
            Err(WalletError::WalletInactive(self.user_id.clone()))
        }
    }

    fn ensure_currency(&self, requested: Currency) -> Result<(), WalletError> {
        if self.currency == requested {
            Ok(())
        } else {
            Err(WalletError::CurrencyMismatch {
                wallet: self.currency,
                requested,
            })
        }
    }

    fn ensure_amount(&self, amount: Decimal) -> Result<(), WalletError> {
        Money::new(amount, self.currency)
            .ensure_positive()
            .map_err(WalletError::from)
    }

    fn ensure_funds(&self, amount: Decimal) -> Result<(), WalletError> {
        if self.balance < amount {
            return Err(WalletError::InsufficientFunds {
                available: self.balance,
                requested: amount,
            });
        }
        Ok(())
    }
}

/// `current + amount`, refused when it would pass the balance ceiling.
fn raise(current: Decimal, amount: Decimal) -> Result<Decimal, WalletError> {
    current
        .checked_add(amount)
        .filter(|v| *v <= Money::MAX_BALANCE)
        .ok_or_else(|| {
            WalletError::invalid_amount(format!(
                "wallet figures may not exceed {}",
                Money::MAX_BALANCE
            ))
        })
}

fn lower(current: Decimal, amount: Decimal) -> Result<Decimal, WalletError> {
    current
        .checked_sub(amount)
        .ok_or_else(|| WalletError::invalid_amount("amount out of range"))
}

impl AggregateRoot for Wallet {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.user_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Move `amount` from `from` to `to`, returning the (sender, recipient) legs.
///
/// Both wallets are validated before either is touched, so a rejection leaves
/// them unchanged. The legs reference each other through their links.
pub fn transfer(
    from: &mut Wallet,
    to: &mut Wallet,
    amount: Decimal,
    description: &str,
    now: DateTime<Utc>,
) -> Result<(LedgerEntry, LedgerEntry), WalletError> {
    if from.user_id == to.user_id {
        return Err(WalletError::invalid_recipient("cannot transfer to yourself"));
    }
    from.ensure_active()?;
    to.ensure_active()?;
    to.ensure_currency(from.currency)?;
    from.ensure_amount(amount)?;
    from.ensure_funds(amount)?;

    let from_balance = lower(from.balance, amount)?;
    let from_spent = raise(from.total_spent, amount)?;
    let to_balance = raise(to.balance, amount)?;
    let to_earned = raise(to.total_earned, amount)?;
    from.balance = from_balance;
    from.total_spent = from_spent;
    to.balance = to_balance;
    to.total_earned = to_earned;

    let mut sent = from.record(
        TransactionKind::Transfer,
        -amount,
        TransactionStatus::Completed,
        EntryDraft::new(format!("{description} (to {})", to.user_id)),
        now,
    );
    let mut received = to.record(
        TransactionKind::Transfer,
        amount,
        TransactionStatus::Completed,
        EntryDraft::new(format!("{description} (from {})", from.user_id)),
        now,
    );
    sent.link_counterpart(to.user_id.clone(), received.id_typed());
    received.link_counterpart(from.user_id.clone(), sent.id_typed());

    Ok((sent, received))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::BankDetails;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn wallet(id: &str) -> Wallet {
        Wallet::open(user(id), Currency::Usd, Utc::now())
    }

    fn usd(amount: Decimal) -> Money {
        Money::new(amount, Currency::Usd)
    }

    fn bank() -> BankDetails {
        BankDetails {
            account_holder: "Provider One".into(),
            account_number: "000123456".into(),
            bank_name: "Test Bank".into(),
            routing_code: Some("TB0001".into()),
        }
    }

    #[test]
    fn credit_increases_balance_and_earnings() {
        let mut w = wallet("seeker");
        let entry = w.credit(usd(dec!(200)), EntryDraft::new("top-up"), Utc::now()).unwrap();

        assert_eq!(w.balance(), dec!(200));
        assert_eq!(w.total_earned(), dec!(200));
        assert_eq!(entry.amount(), dec!(200));
        assert_eq!(entry.balance_after(), dec!(200));
        assert_eq!(entry.status(), TransactionStatus::Completed);
        assert!(w.last_transaction_at().is_some());
    }

    #[test]
    fn credit_rejects_other_currency_and_bad_amounts() {
        let mut w = wallet("seeker");
        let err = w
            .credit(Money::new(dec!(5), Currency::Eur), EntryDraft::new("x"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, WalletError::CurrencyMismatch { .. }));

        let err = w.credit(usd(dec!(0)), EntryDraft::new("x"), Utc::now()).unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));

        let err = w.credit(usd(dec!(1.001)), EntryDraft::new("x"), Utc::now()).unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
        assert_eq!(w.balance(), Decimal::ZERO);
        assert_eq!(w.version(), 0);
    }

    #[test]
    fn withdrawal_over_balance_leaves_wallet_unchanged() {
        let mut w = wallet("provider");
        w.credit(usd(dec!(200)), EntryDraft::new("payout"), Utc::now()).unwrap();
        let before = w.clone();

        let err = w
            .withdraw(dec!(250), EntryDraft::new("cash out").with_bank_details(bank()), Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            WalletError::InsufficientFunds {
                available: dec!(200),
                requested: dec!(250)
            }
        );
        assert_eq!(w, before);
    }

    #[test]
    fn withdrawal_without_bank_details_is_rejected() {
        let mut w = wallet("provider");
        w.credit(usd(dec!(50)), EntryDraft::new("payout"), Utc::now()).unwrap();
        let err = w.withdraw(dec!(10), EntryDraft::new("cash out"), Utc::now()).unwrap_err();
        assert!(matches!(err, WalletError::InvalidRequest(_)));
    }

    #[test]
    fn failed_withdrawal_restores_balance() {
        let mut w = wallet("provider");
        w.credit(usd(dec!(100)), EntryDraft::new("payout"), Utc::now()).unwrap();
        let mut entry = w
            .withdraw(dec!(40), EntryDraft::new("cash out").with_bank_details(bank()), Utc::now())
            .unwrap();

        assert_eq!(entry.status(), TransactionStatus::Pending);
        assert_eq!(entry.amount(), dec!(-40));
        assert_eq!(w.balance(), dec!(60));
        assert_eq!(w.pending_withdrawals(), dec!(40));
        assert_eq!(w.total_spent(), dec!(40));

        w.settle_withdrawal(
            &mut entry,
            SettlementOutcome::Failed {
                reason: "account closed".into(),
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(entry.status(), TransactionStatus::Failed);
        assert_eq!(w.balance(), dec!(100));
        assert_eq!(w.pending_withdrawals(), Decimal::ZERO);
        assert_eq!(w.total_spent(), Decimal::ZERO);
    }

    #[test]
    fn completed_withdrawal_releases_pending_only() {
        let mut w = wallet("provider");
        w.credit(usd(dec!(100)), EntryDraft::new("payout"), Utc::now()).unwrap();
        let mut entry = w
            .withdraw(dec!(40), EntryDraft::new("cash out").with_bank_details(bank()), Utc::now())
            .unwrap();

        w.settle_withdrawal(&mut entry, SettlementOutcome::Completed, Utc::now())
            .unwrap();
        assert_eq!(w.balance(), dec!(60));
        assert_eq!(w.pending_withdrawals(), Decimal::ZERO);

        let err = w
            .settle_withdrawal(&mut entry, SettlementOutcome::Completed, Utc::now())
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidTransition { .. }));
    }

    #[test]
    fn settling_someone_elses_entry_is_forbidden() {
        let mut a = wallet("a");
        let mut b = wallet("b");
        a.credit(usd(dec!(10)), EntryDraft::new("x"), Utc::now()).unwrap();
        let mut entry = a
            .withdraw(dec!(5), EntryDraft::new("y").with_bank_details(bank()), Utc::now())
            .unwrap();
        let err = b
            .settle_withdrawal(&mut entry, SettlementOutcome::Completed, Utc::now())
            .unwrap_err();
        assert_eq!(err, WalletError::Forbidden);
    }

    #[test]
    fn inactive_wallet_rejects_money_movement() {
        let mut w = wallet("seeker");
        assert!(w.set_active(false, Utc::now()));
        let err = w.credit(usd(dec!(1)), EntryDraft::new("x"), Utc::now()).unwrap_err();
        assert!(matches!(err, WalletError::WalletInactive(_)));
        assert!(!w.set_active(false, Utc::now()));
    }

    #[test]
    fn transfer_moves_funds_and_links_legs() {
        let mut u = wallet("u");
        let mut v = wallet("v");
        u.credit(usd(dec!(200)), EntryDraft::new("top-up"), Utc::now()).unwrap();

        let (sent, received) = transfer(&mut u, &mut v, dec!(150), "gift", Utc::now()).unwrap();

        assert_eq!(u.balance(), dec!(50));
        assert_eq!(v.balance(), dec!(150));
        assert_eq!(sent.amount(), dec!(-150));
        assert_eq!(received.amount(), dec!(150));
        assert_eq!(sent.links().counterpart_entry_id, Some(received.id_typed()));
        assert_eq!(received.links().counterpart_entry_id, Some(sent.id_typed()));
        assert_eq!(sent.links().counterpart_user_id.as_ref(), Some(v.user_id()));
        assert_eq!(received.links().counterpart_user_id.as_ref(), Some(u.user_id()));
    }

    #[test]
    fn transfer_rejects_currency_mismatch_without_changes() {
        let mut u = wallet("u");
        let mut v = Wallet::open(user("v"), Currency::Eur, Utc::now());
        u.credit(usd(dec!(20)), EntryDraft::new("top-up"), Utc::now()).unwrap();
        let (u0, v0) = (u.clone(), v.clone());

        let err = transfer(&mut u, &mut v, dec!(10), "x", Utc::now()).unwrap_err();
        assert!(matches!(err, WalletError::CurrencyMismatch { .. }));
        assert_eq!((u, v), (u0, v0));
    }

    fn full_wallet(id: &str) -> Wallet {
        let mut w = wallet(id);
        for _ in 0..10 {
            w.credit(usd(Money::MAX_AMOUNT), EntryDraft::new("top-up"), Utc::now())
                .unwrap();
        }
        assert_eq!(w.balance(), Money::MAX_BALANCE);
        w
    }

    #[test]
    fn credit_past_the_balance_ceiling_is_rejected_without_changes() {
        let mut w = full_wallet("whale");
        let before = w.clone();

        let err = w.credit(usd(dec!(0.01)), EntryDraft::new("x"), Utc::now()).unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
        let err = w.refund(dec!(1), EntryDraft::new("x"), Utc::now()).unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
        assert_eq!(w, before);
    }

    #[test]
    fn transfer_into_a_full_wallet_leaves_both_unchanged() {
        let mut u = wallet("u");
        u.credit(usd(dec!(5)), EntryDraft::new("top-up"), Utc::now()).unwrap();
        let mut v = full_wallet("v");
        let (u0, v0) = (u.clone(), v.clone());

        let err = transfer(&mut u, &mut v, dec!(1), "x", Utc::now()).unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
        assert_eq!((u, v), (u0, v0));
    }

    #[test]
    fn restore_rejects_negative_balance() {
        let now = Utc::now();
        let err = Wallet::restore(RestoredWallet {
            user_id: user("x"),
            balance: dec!(-1),
            currency: Currency::Usd,
            pending_withdrawals: Decimal::ZERO,
            total_earned: Decimal::ZERO,
            total_spent: Decimal::ZERO,
            is_active: true,
            last_transaction_at: None,
            created_at: now,
            updated_at: now,
            version: 1,
        })
        .unwrap_err();
        assert!(matches!(err, WalletError::InvalidRequest(_)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Credit(i64),
        Debit(i64),
        Withdraw(i64),
        TransferOut(i64),
        TransferIn(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..50_000).prop_map(Op::Credit),
            (1i64..50_000).prop_map(Op::Debit),
            (1i64..50_000).prop_map(Op::Withdraw),
            (1i64..50_000).prop_map(Op::TransferOut),
            (1i64..50_000).prop_map(Op::TransferIn),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: no sequence of operations drives a balance below zero,
        /// and transfers conserve the combined balance.
        #[test]
        fn balances_never_negative_and_transfers_conserve(
            ops in prop::collection::vec(op_strategy(), 1..40)
        ) {
            let mut a = wallet("a");
            let mut b = wallet("b");
            b.credit(usd(dec!(1000)), EntryDraft::new("seed"), Utc::now()).unwrap();

            for op in ops {
                let now = Utc::now();
                let before = a.balance() + b.balance();
                match op {
                    Op::Credit(c) => {
                        let _ = a.credit(usd(Decimal::new(c, 2)), EntryDraft::new("c"), now);
                    }
                    Op::Debit(c) => {
                        let _ = a.debit(Decimal::new(c, 2), EntryDraft::new("d"), now);
                    }
                    Op::Withdraw(c) => {
                        let _ = a.withdraw(
                            Decimal::new(c, 2),
                            EntryDraft::new("w").with_bank_details(bank()),
                            now,
                        );
                    }
                    Op::TransferOut(c) => {
                        let _ = transfer(&mut a, &mut b, Decimal::new(c, 2), "t", now);
                        prop_assert_eq!(a.balance() + b.balance(), before);
                    }
                    Op::TransferIn(c) => {
                        let _ = transfer(&mut b, &mut a, Decimal::new(c, 2), "t", now);
                        prop_assert_eq!(a.balance() + b.balance(), before);
                    }
                }
                prop_assert!(a.balance() >= Decimal::ZERO);
                prop_assert!(b.balance() >= Decimal::ZERO);
                prop_assert!(a.pending_withdrawals() >= Decimal::ZERO);
            }
        }
    }
}

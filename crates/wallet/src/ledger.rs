use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use consult_core::{ConsultationId, Currency, Entity, PaymentId, TransactionId, UserId};

use crate::error::WalletError;

/// Kind of monetary movement recorded by a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Credit,
    Debit,
    Refund,
    Withdrawal,
    Transfer,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 5] = [
        TransactionKind::Credit,
        TransactionKind::Debit,
        TransactionKind::Refund,
        TransactionKind::Withdrawal,
        TransactionKind::Transfer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Credit => "credit",
            TransactionKind::Debit => "debit",
            TransactionKind::Refund => "refund",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Transfer => "transfer",
        }
    }

    /// Lenient parse used by query filters: unknown values mean "no filter".
    pub fn parse_lenient(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

/// Lifecycle state of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 4] = [
        TransactionStatus::Pending,
        TransactionStatus::Completed,
        TransactionStatus::Failed,
        TransactionStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn parse_lenient(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

/// Payout destination attached to withdrawals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    pub account_holder: String,
    pub account_number: String,
    pub bank_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_code: Option<String>,
}

impl BankDetails {
    pub fn validate(&self) -> Result<(), WalletError> {
        if self.account_holder.trim().is_empty() {
            return Err(WalletError::invalid_request("bank account holder is required"));
        }
        let digits = self.account_number.trim();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(WalletError::invalid_request("bank account number is invalid"));
        }
        if self.bank_name.trim().is_empty() {
            return Err(WalletError::invalid_request("bank name is required"));
        }
        Ok(())
    }

    /// Account number with everything but the last four characters hidden.
    pub fn masked_account_number(&self) -> String {
        let n = self.account_number.chars().count();
        self.account_number
            .chars()
            .enumerate()
            .map(|(i, c)| if i + 4 < n { '*' } else { c })
            .collect()
    }
}

/// Optional references from an entry to the rest of the marketplace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consultation_id: Option<ConsultationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<PaymentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart_entry_id: Option<TransactionId>,
}

/// Caller-supplied descriptive part of a new entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryDraft {
    pub description: String,
    pub method: Option<String>,
    pub links: EntryLinks,
    pub bank_details: Option<BankDetails>,
}

impl EntryDraft {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: Option<String>) -> Self {
        self.method = method;
        self
    }

    pub fn with_links(mut self, links: EntryLinks) -> Self {
        self.links = links;
        self
    }

    pub fn with_bank_details(mut self, bank_details: BankDetails) -> Self {
        self.bank_details = Some(bank_details);
        self
    }
}

/// How an admin settles a pending withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SettlementOutcome {
    Completed,
    Failed { reason: String },
    Cancelled { reason: Option<String> },
}

impl SettlementOutcome {
    pub fn target_status(&self) -> TransactionStatus {
        match self {
            SettlementOutcome::Completed => TransactionStatus::Completed,
            SettlementOutcome::Failed { .. } => TransactionStatus::Failed,
            SettlementOutcome::Cancelled { .. } => TransactionStatus::Cancelled,
        }
    }
}

/// Immutable record of one monetary movement.
///
/// `amount` is signed: money entering the wallet is positive, money leaving
/// it is negative. Kind and amount never change after construction; only the
/// status (and `processed_at` / `failure_reason`) moves, and only out of
/// `Pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    id: TransactionId,
    user_id: UserId,
    kind: TransactionKind,
    amount: Decimal,
    currency: Currency,
    status: TransactionStatus,
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default)]
    links: EntryLinks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bank_details: Option<BankDetails>,
    balance_after: Decimal,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
}

/// Plain-data form of a persisted entry, used by storage adapters to rebuild
/// an entry without going through the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredEntry {
    pub id: TransactionId,
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub description: String,
    pub method: Option<String>,
    pub links: EntryLinks,
    pub bank_details: Option<BankDetails>,
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl LedgerEntry {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn record(
        id: TransactionId,
        user_id: UserId,
        kind: TransactionKind,
        amount: Decimal,
        currency: Currency,
        status: TransactionStatus,
        draft: EntryDraft,
        balance_after: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        let processed_at = (status == TransactionStatus::Completed).then_some(now);
        Self {
            id,
            user_id,
            kind,
            amount,
            currency,
            status,
            description: draft.description,
            method: draft.method,
            links: draft.links,
            bank_details: draft.bank_details,
            balance_after,
            created_at: now,
            processed_at,
            failure_reason: None,
        }
    }

    pub fn restore(r: RestoredEntry) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            kind: r.kind,
            amount: r.amount,
            currency: r.currency,
            status: r.status,
            description: r.description,
            method: r.method,
            links: r.links,
            bank_details: r.bank_details,
            balance_after: r.balance_after,
            created_at: r.created_at,
            processed_at: r.processed_at,
            failure_reason: r.failure_reason,
        }
    }

    pub fn id_typed(&self) -> TransactionId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Signed amount (positive = into the wallet).
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn links(&self) -> &EntryLinks {
        &self.links
    }

    pub fn bank_details(&self) -> Option<&BankDetails> {
        self.bank_details.as_ref()
    }

    pub fn balance_after(&self) -> Decimal {
        self.balance_after
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn belongs_to(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }

    /// Move a pending entry into a terminal state.
    pub(crate) fn transition(
        &mut self,
        to: TransactionStatus,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), WalletError> {
        if self.status.is_terminal() || to == TransactionStatus::Pending {
            return Err(WalletError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.processed_at = Some(now);
        self.failure_reason = failure_reason;
        Ok(())
    }

    pub(crate) fn link_counterpart(&mut self, user_id: UserId, entry_id: TransactionId) {
        self.links.counterpart_user_id = Some(user_id);
        self.links.counterpart_entry_id = Some(entry_id);
    }
}

impl Entity for LedgerEntry {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

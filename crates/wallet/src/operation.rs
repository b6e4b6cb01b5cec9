//! Explicit request types for wallet operations.
//!
//! Each request is validated at the boundary (`validate`) before it reaches
//! the transaction processor; checks that need wallet state (funds, currency,
//! precision of the wallet currency) happen later under the wallet lock.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use consult_core::{ConsultationId, Currency, Money, PaymentId, UserId};

use crate::error::WalletError;
use crate::ledger::BankDetails;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub currency: Currency,
    pub method: Option<String>,
    pub description: Option<String>,
    pub payment_id: Option<PaymentId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebitRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub description: Option<String>,
    pub consultation_id: Option<ConsultationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub method: Option<String>,
    pub bank_details: BankDetails,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from: UserId,
    pub to: UserId,
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub related_payment_id: PaymentId,
    pub reason: String,
}

/// Tagged union of every money-moving operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum WalletOperation {
    Credit(CreditRequest),
    Debit(DebitRequest),
    Withdraw(WithdrawRequest),
    Transfer(TransferRequest),
    Refund(RefundRequest),
}

impl WalletOperation {
    pub fn name(&self) -> &'static str {
        match self {
            WalletOperation::Credit(_) => "credit",
            WalletOperation::Debit(_) => "debit",
            WalletOperation::Withdraw(_) => "withdraw",
            WalletOperation::Transfer(_) => "transfer",
            WalletOperation::Refund(_) => "refund",
        }
    }

    pub fn amount(&self) -> Decimal {
        match self {
            WalletOperation::Credit(r) => r.amount,
            WalletOperation::Debit(r) => r.amount,
            WalletOperation::Withdraw(r) => r.amount,
            WalletOperation::Transfer(r) => r.amount,
            WalletOperation::Refund(r) => r.amount,
        }
    }

    /// Wallets the operation touches, in lock-acquisition order.
    pub fn wallets(&self) -> Vec<UserId> {
        let mut users = match self {
            WalletOperation::Credit(r) => vec![r.user_id.clone()],
            WalletOperation::Debit(r) => vec![r.user_id.clone()],
            WalletOperation::Withdraw(r) => vec![r.user_id.clone()],
            WalletOperation::Transfer(r) => vec![r.from.clone(), r.to.clone()],
            WalletOperation::Refund(r) => vec![r.user_id.clone()],
        };
        users.sort();
        users.dedup();
        users
    }

    /// Stateless validation; no wallet is consulted.
    pub fn validate(&self) -> Result<(), WalletError> {
        if self.amount() <= Decimal::ZERO {
            return Err(WalletError::invalid_amount("amount must be positive"));
        }
        if self.amount() > Money::MAX_AMOUNT {
            return Err(WalletError::invalid_amount(format!(
                "amount may not exceed {}",
                Money::MAX_AMOUNT
            )));
        }

        match self {
            WalletOperation::Credit(r) => {
                Money::new(r.amount, r.currency).ensure_positive()?;
            }
            WalletOperation::Withdraw(r) => r.bank_details.validate()?,
            WalletOperation::Transfer(r) => {
                if r.from == r.to {
                    return Err(WalletError::invalid_recipient("cannot transfer to yourself"));
                }
            }
            WalletOperation::Refund(r) => {
                if r.reason.trim().is_empty() {
                    return Err(WalletError::invalid_request("refund reason is required"));
                }
            }
            WalletOperation::Debit(_) => {}
        }
        Ok(())
    }
}

//! Postgres-backed wallet store.
//!
//! A unit of work runs inside one database transaction:
//!
//! 1. `SELECT … FOR UPDATE` every scoped wallet, one at a time in sorted user
//!    order (so two transfers between the same pair cannot deadlock)
//! 2. `SELECT … FOR UPDATE` every scoped ledger entry
//! 3. run the mutation in memory
//! 4. write the changed wallets (guarded by their `version` column), insert new
//!    entries, update settled ones
//! 5. commit
//!
//! ## Error Mapping
//!
//! | Situation | StoreError |
//! |-----------|------------|
//! | Unique violation (`23505`) on wallet insert | `Conflict` |
//! | Version guard matched no row | `Conflict` |
//! | Serialization failure / deadlock (`40001`, `40P01`) | `Conflict` |
//! | Any other SQLx error | `Backend` |
//! | Row that does not decode into a domain value | `Corrupt` |
//! | Rollback failing after another error | `RollbackFailed` |

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{error, instrument};
use uuid::Uuid;

use consult_core::{
    AggregateRoot, ConsultationId, Currency, ExpectedVersion, PaymentId, TransactionId, UserId,
};
use consult_wallet::{
    BankDetails, EntryLinks, LedgerEntry, RestoredEntry, RestoredWallet, TransactionKind,
    TransactionStatus, Wallet,
};

use super::{
    Changes, Committed, LockScope, Mutation, Page, Pagination, PaginationMeta, TransactionFilter,
    WalletStore, WorkingSet,
};
use crate::error::{ProcessError, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_wallet_ledger.sql");

const WALLET_COLUMNS: &str = "user_id, balance, currency, pending_withdrawals, total_earned, \
     total_spent, is_active, last_transaction_at, created_at, updated_at, version";

const ENTRY_COLUMNS: &str = "id, user_id, kind, amount, currency, status, description, method, \
     consultation_id, payment_id, counterpart_user_id, counterpart_entry_id, bank_details, \
     balance_after, created_at, processed_at, failure_reason";

/// Postgres-backed wallet store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresWalletStore {
    pool: Arc<PgPool>,
}

impl PostgresWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the wallet tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn run(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        scope: &LockScope,
        mutation: &Mutation<'_>,
    ) -> Result<Changes, ProcessError> {
        let mut wallets = Vec::with_capacity(scope.users().len());
        for user in scope.users() {
            let wallet = lock_wallet(tx, user).await?;
            wallets.push((user.clone(), wallet));
        }

        let mut entries = Vec::with_capacity(scope.entries().len());
        for id in scope.entries() {
            if let Some(entry) = lock_entry(tx, id).await? {
                entries.push(entry);
            }
        }

        let mut working = WorkingSet::load(Utc::now(), wallets, entries);
        mutation(&mut working)?;
        let changes = working.into_changes();

        for write in &changes.writes {
            write_wallet(tx, &write.wallet, write.expected).await?;
        }
        for entry in &changes.appended {
            insert_entry(tx, entry).await?;
        }
        for entry in &changes.updated {
            update_entry(tx, entry).await?;
        }
        Ok(changes)
    }
}

#[async_trait]
impl WalletStore for PostgresWalletStore {
    #[instrument(skip(self, mutation), fields(users = ?scope.users()), err)]
    async fn apply(
        &self,
        scope: &LockScope,
        mutation: &Mutation<'_>,
    ) -> Result<Committed, ProcessError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        match self.run(&mut tx, scope, mutation).await {
            Ok(changes) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                Ok(changes.into_committed())
            }
            Err(cause) => {
                if let Err(rollback) = tx.rollback().await {
                    error!(cause = %cause, rollback = %rollback, "wallet transaction rollback failed");
                    return Err(StoreError::RollbackFailed {
                        cause: cause.to_string(),
                        rollback: rollback.to_string(),
                    }
                    .into());
                }
                Err(cause)
            }
        }
    }

    async fn load_wallet(&self, user: &UserId) -> Result<Option<Wallet>, StoreError> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1");
        let row = sqlx::query(&sql)
            .bind(user.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_wallet", e))?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn load_entry(&self, id: &TransactionId) -> Result<Option<LedgerEntry>, StoreError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM wallet_transactions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_entry", e))?;
        row.as_ref().map(entry_from_row).transpose()
    }

    #[instrument(skip(self, filter), fields(user = %user), err)]
    async fn query_entries(
        &self,
        user: &UserId,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<Page<LedgerEntry>, StoreError> {
        // NULL parameters disable the corresponding filter.
        const WHERE: &str = "user_id = $1 \
             AND ($2::TEXT IS NULL OR kind = $2) \
             AND ($3::TEXT IS NULL OR status = $3) \
             AND ($4::TIMESTAMPTZ IS NULL OR created_at >= $4) \
             AND ($5::TIMESTAMPTZ IS NULL OR created_at <= $5)";

        let kind = filter.kind.map(TransactionKind::as_str);
        let status = filter.status.map(TransactionStatus::as_str);

        let count_sql = format!("SELECT COUNT(*) AS total FROM wallet_transactions WHERE {WHERE}");
        let total: i64 = sqlx::query(&count_sql)
            .bind(user.as_str())
            .bind(kind)
            .bind(status)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_entries", e))?
            .try_get("total")
            .map_err(|e| StoreError::Corrupt(format!("failed to read total: {e}")))?;

        let page_sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM wallet_transactions WHERE {WHERE} \
             ORDER BY seq DESC LIMIT $6 OFFSET $7"
        );
        let rows = sqlx::query(&page_sql)
            .bind(user.as_str())
            .bind(kind)
            .bind(status)
            .bind(filter.from)
            .bind(filter.to)
            .bind(i64::from(pagination.limit))
            .bind(i64::try_from(pagination.offset()).unwrap_or(i64::MAX))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_entries", e))?;

        let items = rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            meta: PaginationMeta::new(pagination, u64::try_from(total).unwrap_or(0)),
        })
    }
}

async fn lock_wallet(
    tx: &mut Transaction<'static, Postgres>,
    user: &UserId,
) -> Result<Option<Wallet>, StoreError> {
    let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(user.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_wallet", e))?;
    row.as_ref().map(wallet_from_row).transpose()
}

async fn lock_entry(
    tx: &mut Transaction<'static, Postgres>,
    id: &TransactionId,
) -> Result<Option<LedgerEntry>, StoreError> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM wallet_transactions WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_entry", e))?;
    row.as_ref().map(entry_from_row).transpose()
}

async fn write_wallet(
    tx: &mut Transaction<'static, Postgres>,
    wallet: &Wallet,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let version = to_db_version(wallet.version())?;
    match expected {
        ExpectedVersion::NoRecord => {
            sqlx::query(
                r#"
                INSERT INTO wallets (
                    user_id, balance, currency, pending_withdrawals, total_earned,
                    total_spent, is_active, last_transaction_at, created_at, updated_at, version
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(wallet.user_id().as_str())
            .bind(wallet.balance())
            .bind(wallet.currency().code())
            .bind(wallet.pending_withdrawals())
            .bind(wallet.total_earned())
            .bind(wallet.total_spent())
            .bind(wallet.is_active())
            .bind(wallet.last_transaction_at())
            .bind(wallet.created_at())
            .bind(wallet.updated_at())
            .bind(version)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("wallet of '{}' was created concurrently", wallet.user_id()))
                } else {
                    map_sqlx_error("insert_wallet", e)
                }
            })?;
        }
        ExpectedVersion::Exact(_) | ExpectedVersion::Any => {
            let previous = match expected {
                ExpectedVersion::Exact(v) => Some(to_db_version(v)?),
                _ => None,
            };
            let result = sqlx::query(
                r#"
                UPDATE wallets SET
                    balance = $2,
                    pending_withdrawals = $3,
                    total_earned = $4,
                    total_spent = $5,
                    is_active = $6,
                    last_transaction_at = $7,
                    updated_at = $8,
                    version = $9
                WHERE user_id = $1 AND ($10::BIGINT IS NULL OR version = $10)
                "#,
            )
            .bind(wallet.user_id().as_str())
            .bind(wallet.balance())
            .bind(wallet.pending_withdrawals())
            .bind(wallet.total_earned())
            .bind(wallet.total_spent())
            .bind(wallet.is_active())
            .bind(wallet.last_transaction_at())
            .bind(wallet.updated_at())
            .bind(version)
            .bind(previous)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_wallet", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict(format!(
                    "wallet of '{}' changed concurrently (expected {expected:?})",
                    wallet.user_id()
                )));
            }
        }
    }
    Ok(())
}

async fn insert_entry(
    tx: &mut Transaction<'static, Postgres>,
    entry: &LedgerEntry,
) -> Result<(), StoreError> {
    let links = entry.links();
    let bank_details = entry
        .bank_details()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("bank details of {}: {e}", entry.id_typed())))?;

    sqlx::query(
        r#"
        INSERT INTO wallet_transactions (
            id, user_id, kind, amount, currency, status, description, method,
            consultation_id, payment_id, counterpart_user_id, counterpart_entry_id, bank_details,
            balance_after, created_at, processed_at, failure_reason
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(entry.id_typed().as_uuid())
    .bind(entry.user_id().as_str())
    .bind(entry.kind().as_str())
    .bind(entry.amount())
    .bind(entry.currency().code())
    .bind(entry.status().as_str())
    .bind(entry.description())
    .bind(entry.method())
    .bind(links.consultation_id.as_ref().map(|c| c.as_str()))
    .bind(links.payment_id.as_ref().map(|p| p.as_str()))
    .bind(links.counterpart_user_id.as_ref().map(|u| u.as_str()))
    .bind(links.counterpart_entry_id.map(|id| *id.as_uuid()))
    .bind(bank_details)
    .bind(entry.balance_after())
    .bind(entry.created_at())
    .bind(entry.processed_at())
    .bind(entry.failure_reason())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_entry", e))?;
    Ok(())
}

async fn update_entry(
    tx: &mut Transaction<'static, Postgres>,
    entry: &LedgerEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE wallet_transactions
        SET status = $2, processed_at = $3, failure_reason = $4
        WHERE id = $1
        "#,
    )
    .bind(entry.id_typed().as_uuid())
    .bind(entry.status().as_str())
    .bind(entry.processed_at())
    .bind(entry.failure_reason())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_entry", e))?;
    Ok(())
}

fn to_db_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Corrupt(format!("version {version} out of range")))
}

// Row decoding

fn corrupt(what: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {e}"))
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet, StoreError> {
    let user_id: String = row.try_get("user_id").map_err(|e| corrupt("wallet.user_id", e))?;
    let currency: String = row.try_get("currency").map_err(|e| corrupt("wallet.currency", e))?;
    let version: i64 = row.try_get("version").map_err(|e| corrupt("wallet.version", e))?;

    let restored = RestoredWallet {
        user_id: UserId::parse(&user_id).map_err(|e| corrupt("wallet.user_id", e))?,
        balance: get_decimal(row, "balance")?,
        currency: Currency::from_str(&currency).map_err(|e| corrupt("wallet.currency", e))?,
        pending_withdrawals: get_decimal(row, "pending_withdrawals")?,
        total_earned: get_decimal(row, "total_earned")?,
        total_spent: get_decimal(row, "total_spent")?,
        is_active: row.try_get("is_active").map_err(|e| corrupt("wallet.is_active", e))?,
        last_transaction_at: row
            .try_get("last_transaction_at")
            .map_err(|e| corrupt("wallet.last_transaction_at", e))?,
        created_at: row.try_get("created_at").map_err(|e| corrupt("wallet.created_at", e))?,
        updated_at: row.try_get("updated_at").map_err(|e| corrupt("wallet.updated_at", e))?,
        version: u64::try_from(version).map_err(|e| corrupt("wallet.version", e))?,
    };
    Wallet::restore(restored).map_err(|e| corrupt("wallet", e))
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let id: Uuid = row.try_get("id").map_err(|e| corrupt("entry.id", e))?;
    let user_id: String = row.try_get("user_id").map_err(|e| corrupt("entry.user_id", e))?;
    let kind: String = row.try_get("kind").map_err(|e| corrupt("entry.kind", e))?;
    let status: String = row.try_get("status").map_err(|e| corrupt("entry.status", e))?;
    let currency: String = row.try_get("currency").map_err(|e| corrupt("entry.currency", e))?;
    let consultation_id: Option<String> = row
        .try_get("consultation_id")
        .map_err(|e| corrupt("entry.consultation_id", e))?;
    let payment_id: Option<String> =
        row.try_get("payment_id").map_err(|e| corrupt("entry.payment_id", e))?;
    let counterpart_user_id: Option<String> = row
        .try_get("counterpart_user_id")
        .map_err(|e| corrupt("entry.counterpart_user_id", e))?;
    let counterpart_entry_id: Option<Uuid> = row
        .try_get("counterpart_entry_id")
        .map_err(|e| corrupt("entry.counterpart_entry_id", e))?;
    let bank_details: Option<serde_json::Value> = row
        .try_get("bank_details")
        .map_err(|e| corrupt("entry.bank_details", e))?;
    let created_at: DateTime<Utc> =
        row.try_get("created_at").map_err(|e| corrupt("entry.created_at", e))?;

    let links = EntryLinks {
        consultation_id: consultation_id
            .map(ConsultationId::parse)
            .transpose()
            .map_err(|e| corrupt("entry.consultation_id", e))?,
        payment_id: payment_id
            .map(PaymentId::parse)
            .transpose()
            .map_err(|e| corrupt("entry.payment_id", e))?,
        counterpart_user_id: counterpart_user_id
            .map(UserId::parse)
            .transpose()
            .map_err(|e| corrupt("entry.counterpart_user_id", e))?,
        counterpart_entry_id: counterpart_entry_id.map(TransactionId::from_uuid),
    };

    Ok(LedgerEntry::restore(RestoredEntry {
        id: TransactionId::from_uuid(id),
        user_id: UserId::parse(&user_id).map_err(|e| corrupt("entry.user_id", e))?,
        kind: TransactionKind::parse_lenient(&kind)
            .ok_or_else(|| corrupt("entry.kind", format!("unknown kind '{kind}'")))?,
        amount: get_decimal(row, "amount")?,
        currency: Currency::from_str(&currency).map_err(|e| corrupt("entry.currency", e))?,
        status: TransactionStatus::parse_lenient(&status)
            .ok_or_else(|| corrupt("entry.status", format!("unknown status '{status}'")))?,
        description: row.try_get("description").map_err(|e| corrupt("entry.description", e))?,
        method: row.try_get("method").map_err(|e| corrupt("entry.method", e))?,
        links,
        bank_details: bank_details
            .map(serde_json::from_value::<BankDetails>)
            .transpose()
            .map_err(|e| corrupt("entry.bank_details", e))?,
        balance_after: get_decimal(row, "balance_after")?,
        created_at,
        processed_at: row.try_get("processed_at").map_err(|e| corrupt("entry.processed_at", e))?,
        failure_reason: row
            .try_get("failure_reason")
            .map_err(|e| corrupt("entry.failure_reason", e))?,
    }))
}

fn get_decimal(row: &PgRow, column: &str) -> Result<Decimal, StoreError> {
    row.try_get::<Decimal, _>(column)
        .map(|d| d.normalize())
        .map_err(|e| corrupt(column, e))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                _ => StoreError::backend(operation, msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::backend(operation, "connection pool closed"),
        sqlx::Error::PoolTimedOut => StoreError::backend(operation, "connection pool timed out"),
        other => StoreError::backend(operation, other.to_string()),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

//! Filtering and pagination for ledger history queries.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use consult_wallet::{LedgerEntry, TransactionKind, TransactionStatus};

/// Filter criteria for ledger history. `None` means "no filter".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub kind: Option<TransactionKind>,
    pub status: Option<TransactionStatus>,
    /// Inclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
}

impl TransactionFilter {
    /// Build a filter from raw query-string values.
    ///
    /// Unknown kinds/statuses and unparseable dates are dropped rather than
    /// rejected. Dates accept RFC3339 or plain `YYYY-MM-DD` (start of day for
    /// `from`, end of day for `to`).
    pub fn from_query(
        kind: Option<&str>,
        status: Option<&str>,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Self {
        Self {
            kind: kind.and_then(TransactionKind::parse_lenient),
            status: status.and_then(TransactionStatus::parse_lenient),
            from: from.and_then(|s| parse_date(s, false)),
            to: to.and_then(|s| parse_date(s, true)),
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.kind.is_none_or(|k| entry.kind() == k)
            && self.status.is_none_or(|s| entry.status() == s)
            && self.from.is_none_or(|from| entry.created_at() >= from)
            && self.to.is_none_or(|to| entry.created_at() <= to)
    }
}

fn parse_date(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)?
    } else {
        date.and_hms_opt(0, 0, 0)?
    };
    Some(time.and_utc())
}

/// Page request (1-based page number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    /// Normalize raw values: page 0 becomes 1, limit is clamped to
    /// `1..=max_limit`.
    pub fn new(page: Option<u32>, limit: Option<u32>, default_limit: u32, max_limit: u32) -> Self {
        let max_limit = max_limit.max(1);
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default_limit).clamp(1, max_limit),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

/// Pagination metadata returned alongside a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PaginationMeta {
    pub fn new(pagination: Pagination, total: u64) -> Self {
        let total_pages = total.div_ceil(u64::from(pagination.limit));
        Self {
            page: pagination.page,
            limit: pagination.limit,
            total,
            total_pages,
            has_next: u64::from(pagination.page) < total_pages,
            has_prev: pagination.page > 1,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub meta: PaginationMeta,
}

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Json, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::{Value, json};

use consult_core::{ConsultationId, Currency, PaymentId, TransactionId, UserId};
use consult_infra::{BalanceView, PaginationMeta};
use consult_wallet::{BankDetails, LedgerEntry};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct OpenWalletRequest {
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub amount: Decimal,
    pub currency: Option<String>,
    pub method: Option<String>,
    pub description: Option<String>,
    pub payment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    pub amount: Decimal,
    pub consultation_id: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawBody {
    pub amount: Decimal,
    pub method: Option<String>,
    pub bank_details: Option<BankDetails>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferBody {
    pub recipient_id: String,
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub amount: Decimal,
    pub payment_id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveBody {
    pub active: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

// -------------------------
// Extraction helpers
// -------------------------

/// Unwrap a JSON body, turning axum's rejection into the error envelope.
pub fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, axum::response::Response> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| errors::bad_request("invalid_body", e.body_text()))
}

pub fn query<T>(payload: Result<Query<T>, QueryRejection>) -> Result<T, axum::response::Response> {
    payload
        .map(|Query(v)| v)
        .map_err(|e| errors::bad_request("invalid_query", e.body_text()))
}

pub fn parse_user_id(raw: &str) -> Result<UserId, axum::response::Response> {
    UserId::parse(raw).map_err(|e| errors::bad_request("invalid_user_id", e.to_string()))
}

pub fn parse_transaction_id(raw: &str) -> Result<TransactionId, axum::response::Response> {
    raw.parse::<TransactionId>()
        .map_err(|e| errors::bad_request("invalid_transaction_id", e.to_string()))
}

pub fn parse_currency(raw: Option<&str>) -> Result<Option<Currency>, axum::response::Response> {
    raw.map(|s| {
        s.parse::<Currency>()
            .map_err(|e| errors::bad_request("invalid_currency", e.to_string()))
    })
    .transpose()
}

pub fn parse_payment_id(raw: Option<&str>) -> Result<Option<PaymentId>, axum::response::Response> {
    raw.map(|s| {
        PaymentId::parse(s).map_err(|e| errors::bad_request("invalid_payment_id", e.to_string()))
    })
    .transpose()
}

pub fn parse_consultation_id(
    raw: Option<&str>,
) -> Result<Option<ConsultationId>, axum::response::Response> {
    raw.map(|s| {
        ConsultationId::parse(s)
            .map_err(|e| errors::bad_request("invalid_consultation_id", e.to_string()))
    })
    .transpose()
}

// -------------------------
// Response mapping
// -------------------------

/// Amounts go over the wire as JSON numbers.
///
/// Wallet figures are capped at `Money::MAX_BALANCE` with at most two decimals,
/// which keeps them under 2^53 minor units, so the `f64` is exact.
pub fn amount_json(amount: Decimal) -> Value {
    amount
        .normalize()
        .to_f64()
        .map(|f| json!(f))
        .unwrap_or_else(|| json!(amount.to_string()))
}

pub fn balance_to_json(view: &BalanceView) -> Value {
    json!({
        "user_id": view.user_id.as_str(),
        "balance": amount_json(view.balance),
        "currency": view.currency.code(),
        "total_earned": amount_json(view.total_earned),
        "total_spent": amount_json(view.total_spent),
        "pending_withdrawals": amount_json(view.pending_withdrawals),
        "is_active": view.is_active,
        "exists": view.exists,
    })
}

pub fn entry_to_json(entry: &LedgerEntry) -> Value {
    let links = entry.links();
    json!({
        "id": entry.id_typed().to_string(),
        "user_id": entry.user_id().as_str(),
        "type": entry.kind().as_str(),
        "amount": amount_json(entry.amount()),
        "currency": entry.currency().code(),
        "status": entry.status().as_str(),
        "description": entry.description(),
        "method": entry.method(),
        "consultation_id": links.consultation_id.as_ref().map(|c| c.as_str()),
        "payment_id": links.payment_id.as_ref().map(|p| p.as_str()),
        "counterpart_user_id": links.counterpart_user_id.as_ref().map(|u| u.as_str()),
        "counterpart_transaction_id": links.counterpart_entry_id.map(|id| id.to_string()),
        "bank_details": entry.bank_details().map(|b| json!({
            "account_holder": b.account_holder,
            "account_number": b.masked_account_number(),
            "bank_name": b.bank_name,
            "routing_code": b.routing_code,
        })),
        "balance_after": amount_json(entry.balance_after()),
        "created_at": entry.created_at().to_rfc3339(),
        "processed_at": entry.processed_at().map(|t| t.to_rfc3339()),
        "failure_reason": entry.failure_reason(),
    })
}

pub fn pagination_to_json(meta: &PaginationMeta) -> Value {
    json!({
        "page": meta.page,
        "limit": meta.limit,
        "total": meta.total,
        "total_pages": meta.total_pages,
        "has_next": meta.has_next,
        "has_prev": meta.has_prev,
    })
}

/// Success envelope.
pub fn ok(status: StatusCode, data: Value) -> axum::response::Response {
    (status, Json(json!({ "success": true, "data": data }))).into_response()
}

pub fn ok_paginated(data: Value, meta: &PaginationMeta) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": data,
            "pagination": pagination_to_json(meta),
        })),
    )
        .into_response()
}

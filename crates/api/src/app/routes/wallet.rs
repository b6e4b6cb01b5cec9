//! Self-service wallet routes. Every route acts on the caller's own wallet.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use serde_json::json;

use consult_auth::Permission;
use consult_core::UserId;
use consult_infra::{BalanceView, Receipt, TransactionFilter};
use consult_wallet::{
    CreditRequest, DebitRequest, TransferRequest, WalletError, WalletOperation, WithdrawRequest,
};

use crate::app::dto::{
    self, DepositRequest, OpenWalletRequest, PayRequest, TransactionsQuery, TransferBody,
    WithdrawBody,
};
use crate::app::errors;
use crate::app::routes::common::{CmdAuth, require};
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(get_wallet).post(open_wallet))
        .route("/transactions", get(list_transactions))
        .route("/transactions/:id", get(get_transaction))
        .route("/deposit", post(deposit))
        .route("/pay", post(pay))
        .route("/withdraw", post(withdraw))
        .route("/transfer", post(transfer))
}

/// GET /wallet
pub async fn get_wallet(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    require(&principal, Permission::WALLET_READ)?;

    let view = services
        .queries
        .get_balance(principal.user_id())
        .await
        .map_err(errors::process_error_to_response)?;
    Ok(dto::ok(StatusCode::OK, dto::balance_to_json(&view)))
}

/// POST /wallet - idempotent; 201 only when the wallet is new.
pub async fn open_wallet(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    raw: Bytes,
) -> Result<Response, Response> {
    require(&principal, Permission::WALLET_TRANSACT)?;

    let body: OpenWalletRequest = if raw.iter().all(u8::is_ascii_whitespace) {
        OpenWalletRequest::default()
    } else {
        serde_json::from_slice(&raw).map_err(|e| errors::bad_request("invalid_body", e.to_string()))?
    };
    let currency = dto::parse_currency(body.currency.as_deref())?;

    let outcome = services
        .processor
        .open_wallet(principal.user_id(), currency)
        .await
        .map_err(errors::process_error_to_response)?;

    let status = if outcome.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let view = BalanceView::from(outcome.get());
    Ok(dto::ok(status, dto::balance_to_json(&view)))
}

/// GET /wallet/transactions?page&limit&type&status&from&to
pub async fn list_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    params: Result<Query<TransactionsQuery>, QueryRejection>,
) -> Result<Response, Response> {
    require(&principal, Permission::WALLET_READ)?;
    let params = dto::query(params)?;

    let filter = TransactionFilter::from_query(
        params.kind.as_deref(),
        params.status.as_deref(),
        params.from.as_deref(),
        params.to.as_deref(),
    );
    let page = services
        .queries
        .list_transactions(principal.user_id(), &filter, params.page, params.limit)
        .await
        .map_err(errors::process_error_to_response)?;

    let items: Vec<_> = page.items.iter().map(dto::entry_to_json).collect();
    Ok(dto::ok_paginated(json!(items), &page.meta))
}

/// GET /wallet/transactions/:id
pub async fn get_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require(&principal, Permission::WALLET_READ)?;
    let id = dto::parse_transaction_id(&id)?;

    let entry = services
        .queries
        .get_transaction(principal.user_id(), &id)
        .await
        .map_err(errors::process_error_to_response)?;
    Ok(dto::ok(StatusCode::OK, dto::entry_to_json(&entry)))
}

/// POST /wallet/deposit
///
/// Without an explicit currency the deposit uses the wallet's own currency,
/// or the configured default for a wallet that does not exist yet.
pub async fn deposit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<DepositRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let body: DepositRequest = dto::body(payload)?;
    let user_id = principal.user_id().clone();

    let currency = match dto::parse_currency(body.currency.as_deref())? {
        Some(c) => c,
        None => {
            let view = services
                .queries
                .get_balance(&user_id)
                .await
                .map_err(errors::process_error_to_response)?;
            if view.exists {
                view.currency
            } else {
                services.config.default_currency
            }
        }
    };

    let op = WalletOperation::Credit(CreditRequest {
        user_id,
        amount: body.amount,
        currency,
        method: body.method,
        description: body.description,
        payment_id: dto::parse_payment_id(body.payment_id.as_deref())?,
    });
    execute(&services, &principal, op).await
}

/// POST /wallet/pay
pub async fn pay(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<PayRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let body: PayRequest = dto::body(payload)?;

    let op = WalletOperation::Debit(DebitRequest {
        user_id: principal.user_id().clone(),
        amount: body.amount,
        description: body.description,
        consultation_id: dto::parse_consultation_id(body.consultation_id.as_deref())?,
    });
    execute(&services, &principal, op).await
}

/// POST /wallet/withdraw - reserves funds; an admin settles it later.
pub async fn withdraw(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<WithdrawBody>, JsonRejection>,
) -> Result<Response, Response> {
    let body: WithdrawBody = dto::body(payload)?;
    let bank_details = body.bank_details.ok_or_else(|| {
        errors::wallet_error_to_response(WalletError::invalid_request("bank details are required"))
    })?;

    let op = WalletOperation::Withdraw(WithdrawRequest {
        user_id: principal.user_id().clone(),
        amount: body.amount,
        method: body.method,
        bank_details,
        description: body.description,
    });
    execute(&services, &principal, op).await
}

/// POST /wallet/transfer
pub async fn transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<TransferBody>, JsonRejection>,
) -> Result<Response, Response> {
    let body: TransferBody = dto::body(payload)?;

    let op = WalletOperation::Transfer(TransferRequest {
        from: principal.user_id().clone(),
        to: dto::parse_user_id(&body.recipient_id)?,
        amount: body.amount,
        description: body.description,
    });
    execute(&services, &principal, op).await
}

async fn execute(
    services: &AppServices,
    principal: &PrincipalContext,
    op: WalletOperation,
) -> Result<Response, Response> {
    let op = CmdAuth::new(op, &[Permission::WALLET_TRANSACT]).check(principal)?;
    let receipt = services
        .processor
        .execute(op)
        .await
        .map_err(errors::process_error_to_response)?;
    Ok(dto::ok(
        StatusCode::CREATED,
        receipt_to_json(&receipt, principal.user_id()),
    ))
}

/// `user`'s leg of the operation plus their post-commit balance. The
/// counterpart leg of a transfer is included as `received`.
pub(crate) fn receipt_to_json(receipt: &Receipt, user: &UserId) -> serde_json::Value {
    let own = receipt.entries.iter().find(|e| e.belongs_to(user));
    let received = receipt.entries.iter().find(|e| !e.belongs_to(user));

    let mut data = json!({
        "transaction": own.or(receipt.entry()).map(dto::entry_to_json),
        "wallet": receipt.wallet(user).map(|w| dto::balance_to_json(&BalanceView::from(w))),
    });
    if let Some(entry) = received {
        data["received"] = dto::entry_to_json(entry);
    }
    data
}

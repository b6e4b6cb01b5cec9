//! Back-office routes: refunds, withdrawal settlement and wallet activation.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::Response,
    routing::post,
};

use consult_auth::Permission;
use consult_core::PaymentId;
use consult_infra::BalanceView;
use consult_wallet::{RefundRequest, SettlementOutcome, WalletOperation};

use crate::app::dto::{self, RefundBody, SetActiveBody};
use crate::app::errors;
use crate::app::routes::common::{CmdAuth, require};
use crate::app::routes::wallet::receipt_to_json;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/wallets/:user_id/refund", post(refund))
        .route("/wallets/:user_id/active", post(set_active))
        .route("/withdrawals/:id/settle", post(settle_withdrawal))
}

/// POST /admin/wallets/:user_id/refund
pub async fn refund(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<String>,
    payload: Result<Json<RefundBody>, JsonRejection>,
) -> Result<Response, Response> {
    let user_id = dto::parse_user_id(&user_id)?;
    let body: RefundBody = dto::body(payload)?;
    let related_payment_id = PaymentId::parse(&body.payment_id)
        .map_err(|e| errors::bad_request("invalid_payment_id", e.to_string()))?;

    let op = WalletOperation::Refund(RefundRequest {
        user_id: user_id.clone(),
        amount: body.amount,
        related_payment_id,
        reason: body.reason,
    });
    let op = CmdAuth::new(op, &[Permission::WALLET_REFUND]).check(&principal)?;

    let receipt = services
        .processor
        .execute(op)
        .await
        .map_err(errors::process_error_to_response)?;
    tracing::info!(admin = %principal.user_id(), user = %user_id, "refund issued");
    Ok(dto::ok(StatusCode::CREATED, receipt_to_json(&receipt, &user_id)))
}

/// POST /admin/withdrawals/:id/settle
///
/// Body: `{"outcome": "completed"}`, `{"outcome": "failed", "reason": ".."}`
/// or `{"outcome": "cancelled"}`.
pub async fn settle_withdrawal(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<SettlementOutcome>, JsonRejection>,
) -> Result<Response, Response> {
    require(&principal, Permission::WALLET_SETTLE)?;
    let id = dto::parse_transaction_id(&id)?;
    let outcome = dto::body(payload)?;

    let receipt = services
        .processor
        .settle_withdrawal(id, outcome)
        .await
        .map_err(errors::process_error_to_response)?;

    let owner = receipt.entry().map(|e| e.user_id().clone());
    let data = match owner {
        Some(owner) => receipt_to_json(&receipt, &owner),
        None => serde_json::Value::Null,
    };
    Ok(dto::ok(StatusCode::OK, data))
}

/// POST /admin/wallets/:user_id/active
pub async fn set_active(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<String>,
    payload: Result<Json<SetActiveBody>, JsonRejection>,
) -> Result<Response, Response> {
    require(&principal, Permission::WALLET_ADMIN)?;
    let user_id = dto::parse_user_id(&user_id)?;
    let body: SetActiveBody = dto::body(payload)?;

    let wallet = services
        .processor
        .set_active(&user_id, body.active)
        .await
        .map_err(errors::process_error_to_response)?;
    tracing::info!(
        admin = %principal.user_id(),
        user = %user_id,
        active = body.active,
        "wallet activation changed"
    );
    Ok(dto::ok(StatusCode::OK, dto::balance_to_json(&BalanceView::from(&wallet))))
}

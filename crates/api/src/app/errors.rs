use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use consult_auth::AuthzError;
use consult_infra::{ProcessError, StoreError};
use consult_wallet::WalletError;

pub fn process_error_to_response(err: ProcessError) -> axum::response::Response {
    match err {
        ProcessError::Rejected(e) => wallet_error_to_response(e),
        ProcessError::Persistence(StoreError::Conflict(msg)) => {
            json_error(StatusCode::CONFLICT, "conflict", msg)
        }
        ProcessError::Persistence(e) => {
            tracing::warn!(error = %e, "request failed on persistence");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "wallet storage is unavailable",
            )
        }
    }
}

pub fn wallet_error_to_response(err: WalletError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        WalletError::InvalidAmount(_) => json_error(StatusCode::BAD_REQUEST, "invalid_amount", message),
        WalletError::InvalidRequest(_) => json_error(StatusCode::BAD_REQUEST, "invalid_request", message),
        WalletError::CurrencyMismatch { .. } => {
            json_error(StatusCode::BAD_REQUEST, "currency_mismatch", message)
        }
        WalletError::InvalidRecipient(_) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_recipient", message)
        }
        WalletError::InsufficientFunds { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "insufficient_funds", message)
        }
        WalletError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        WalletError::Forbidden => json_error(StatusCode::FORBIDDEN, "forbidden", message),
        WalletError::WalletInactive(_) => json_error(StatusCode::CONFLICT, "wallet_inactive", message),
        WalletError::InvalidTransition { .. } => {
            json_error(StatusCode::CONFLICT, "invalid_transition", message)
        }
    }
}

pub fn authz_error_to_response(err: AuthzError) -> axum::response::Response {
    json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string())
}

pub fn bad_request(code: &'static str, message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, code, message)
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "success": false,
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn rejections_map_to_statuses() {
        let cases = [
            (WalletError::invalid_amount("x"), StatusCode::BAD_REQUEST),
            (
                WalletError::InsufficientFunds {
                    available: Decimal::ZERO,
                    requested: Decimal::ONE,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (WalletError::not_found("x"), StatusCode::NOT_FOUND),
            (WalletError::Forbidden, StatusCode::FORBIDDEN),
            (WalletError::invalid_recipient("self"), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(process_error_to_response(err.into()).status(), status);
        }
    }

    #[test]
    fn persistence_failures_split_conflict_from_outage() {
        let conflict = ProcessError::Persistence(StoreError::Conflict("v".into()));
        assert_eq!(process_error_to_response(conflict).status(), StatusCode::CONFLICT);

        let outage = ProcessError::Persistence(StoreError::backend("load", "down"));
        assert_eq!(
            process_error_to_response(outage).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}

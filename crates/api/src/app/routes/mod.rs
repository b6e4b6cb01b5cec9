use axum::{Router, routing::get};

pub mod admin;
pub mod common;
pub mod system;
pub mod wallet;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/wallet", wallet::router())
        .nest("/admin", admin::router())
}

//! HTTP application wiring (axum router + service wiring).
//!
//! - `services.rs`: stores, directory, processor and query service
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request DTOs, JSON mapping and the response envelope
//! - `errors.rs`: error to status mapping

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

use consult_auth::Hs256JwtValidator;

use crate::config::ApiConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router from configuration.
pub async fn build_app(config: &ApiConfig) -> Result<Router, services::ServiceError> {
    let services = services::build_services(config).await?;
    Ok(build_app_with(services, &config.jwt_secret))
}

/// Build the router around already-wired services.
pub fn build_app_with(services: services::AppServices, jwt_secret: &str) -> Router {
    let auth_state = middleware::AuthState {
        jwt: Arc::new(Hs256JwtValidator::new(jwt_secret)),
        directory: services.directory.clone(),
    };

    // Protected routes: require a valid bearer token.
    let protected = routes::router()
        .layer(Extension(Arc::new(services)))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}

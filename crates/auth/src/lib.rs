//! `consult-auth`: authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: callers hand in tokens and get back
//! claims, principals and allow/deny decisions.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, CommandAuthorization, authorize, authorize_owner};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::{Permission, permissions_for_roles};
pub use principal::Principal;
pub use roles::Role;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use consult_core::UserId;

use crate::Role;

/// JWT claims model (transport-agnostic).
///
/// The subject is the marketplace user id; it is also the wallet owner for
/// every wallet route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject / user identifier.
    pub sub: UserId,

    /// Marketplace roles (`seeker`, `provider`, `finance`, `admin`).
    #[serde(default)]
    pub roles: Vec<Role>,

    pub issued_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("invalid token signature")]
    InvalidSignature,
}

/// Deterministically validate JWT claims.
///
/// Validates the time window only; signatures are checked by
/// [`crate::JwtValidator`] implementations.
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(issued: DateTime<Utc>, expires: DateTime<Utc>) -> JwtClaims {
        JwtClaims {
            sub: UserId::parse("seeker-1").unwrap(),
            roles: vec![Role::seeker()],
            issued_at: issued,
            expires_at: expires,
        }
    }

    #[test]
    fn window_is_enforced() {
        let now = Utc::now();
        let ok = claims(now - Duration::minutes(1), now + Duration::minutes(1));
        assert!(validate_claims(&ok, now).is_ok());

        let expired = claims(now - Duration::minutes(2), now - Duration::minutes(1));
        assert_eq!(validate_claims(&expired, now), Err(TokenValidationError::Expired));

        let future = claims(now + Duration::minutes(1), now + Duration::minutes(2));
        assert_eq!(validate_claims(&future, now), Err(TokenValidationError::NotYetValid));

        let inverted = claims(now, now - Duration::minutes(1));
        assert_eq!(
            validate_claims(&inverted, now),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }

    #[test]
    fn roles_default_to_empty() {
        let json = serde_json::json!({
            "sub": "provider-7",
            "issued_at": "2024-01-01T00:00:00Z",
            "expires_at": "2024-01-01T01:00:00Z",
        });
        let claims: JwtClaims = serde_json::from_value(json).unwrap();
        assert!(claims.roles.is_empty());
        assert_eq!(claims.sub.as_str(), "provider-7");
    }
}

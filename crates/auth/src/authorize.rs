use std::collections::HashSet;

use thiserror::Error;

use consult_core::UserId;

use crate::{Permission, Principal};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error("forbidden: resource belongs to another user")]
    NotOwner,
}

/// Authorization contract for operations, checked at the API boundary before
/// anything reaches the processor.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[Permission];
}

/// Pure policy check: no IO, no panics.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let perms: HashSet<&str> = principal.permissions.iter().map(|p| p.as_str()).collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// The principal may act on `owner`'s wallet only if it is their own.
pub fn authorize_owner(principal: &Principal, owner: &UserId) -> Result<(), AuthzError> {
    if &principal.user_id == owner {
        Ok(())
    } else {
        Err(AuthzError::NotOwner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    fn principal(roles: Vec<Role>) -> Principal {
        Principal::from_roles(UserId::parse("user-1").unwrap(), roles)
    }

    #[test]
    fn wildcard_allows_everything() {
        let admin = principal(vec![Role::admin()]);
        assert!(authorize(&admin, &Permission::new(Permission::WALLET_ADMIN)).is_ok());
    }

    #[test]
    fn missing_permission_is_named() {
        let seeker = principal(vec![Role::seeker()]);
        assert_eq!(
            authorize(&seeker, &Permission::new(Permission::WALLET_REFUND)),
            Err(AuthzError::Forbidden("wallet.refund".into()))
        );
        assert!(authorize(&seeker, &Permission::new(Permission::WALLET_TRANSACT)).is_ok());
    }

    #[test]
    fn ownership_is_by_user_id() {
        let p = principal(vec![]);
        assert!(authorize_owner(&p, &UserId::parse("user-1").unwrap()).is_ok());
        assert_eq!(
            authorize_owner(&p, &UserId::parse("user-2").unwrap()),
            Err(AuthzError::NotOwner)
        );
    }
}

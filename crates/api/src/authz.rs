//! API-side authorization guard for operations.
//!
//! Checked before anything reaches the processor; the processor and stores
//! stay auth-agnostic.

use consult_auth::{AuthzError, CommandAuthorization, authorize};

use crate::context::PrincipalContext;

/// Check every permission the operation requires against the request principal.
pub fn authorize_command<C: CommandAuthorization>(
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    let principal = principal.principal();
    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use consult_auth::{Permission, Role};
    use consult_core::UserId;

    struct Needs(Vec<Permission>);

    impl CommandAuthorization for Needs {
        fn required_permissions(&self) -> &[Permission] {
            &self.0
        }
    }

    fn ctx(roles: Vec<Role>) -> PrincipalContext {
        PrincipalContext::new(UserId::parse("u-1").unwrap(), roles)
    }

    #[test]
    fn seeker_cannot_settle() {
        let cmd = Needs(vec![Permission::new(Permission::WALLET_SETTLE)]);
        assert!(authorize_command(&ctx(vec![Role::seeker()]), &cmd).is_err());
        assert!(authorize_command(&ctx(vec![Role::finance()]), &cmd).is_ok());
    }

    #[test]
    fn all_permissions_are_required() {
        let cmd = Needs(vec![
            Permission::new(Permission::WALLET_TRANSACT),
            Permission::new(Permission::WALLET_ADMIN),
        ]);
        assert_eq!(
            authorize_command(&ctx(vec![Role::finance()]), &cmd),
            Err(AuthzError::Forbidden("wallet.admin".into()))
        );
        assert!(authorize_command(&ctx(vec![Role::admin()]), &cmd).is_ok());
    }
}

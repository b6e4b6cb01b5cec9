use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::Role;

/// Permission identifier (e.g. `"wallet.refund"`).
///
/// The wildcard `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    /// View own balance and history.
    pub const WALLET_READ: &'static str = "wallet.read";
    /// Move money out of / into one's own wallet.
    pub const WALLET_TRANSACT: &'static str = "wallet.transact";
    pub const WALLET_REFUND: &'static str = "wallet.refund";
    pub const WALLET_SETTLE: &'static str = "wallet.settle";
    /// Activate / deactivate wallets.
    pub const WALLET_ADMIN: &'static str = "wallet.admin";

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn wildcard() -> Self {
        Self::new("*")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static role → permission policy.
///
/// Every authenticated user may use their own wallet; `finance` additionally
/// refunds and settles payouts; `admin` gets the wildcard.
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    if roles.iter().any(|r| r.as_str() == Role::ADMIN) {
        return vec![Permission::wildcard()];
    }

    let mut perms = vec![
        Permission::new(Permission::WALLET_READ),
        Permission::new(Permission::WALLET_TRANSACT),
    ];
    if roles.iter().any(|r| r.as_str() == Role::FINANCE) {
        perms.push(Permission::new(Permission::WALLET_REFUND));
        perms.push(Permission::new(Permission::WALLET_SETTLE));
    }
    perms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_gets_wildcard() {
        let perms = permissions_for_roles(&[Role::seeker(), Role::admin()]);
        assert_eq!(perms, vec![Permission::wildcard()]);
    }

    #[test]
    fn finance_can_refund_and_settle_but_not_administer() {
        let perms = permissions_for_roles(&[Role::finance()]);
        assert!(perms.contains(&Permission::new(Permission::WALLET_REFUND)));
        assert!(perms.contains(&Permission::new(Permission::WALLET_SETTLE)));
        assert!(!perms.contains(&Permission::new(Permission::WALLET_ADMIN)));
    }

    #[test]
    fn plain_users_only_use_their_wallet() {
        let perms = permissions_for_roles(&[Role::provider()]);
        assert_eq!(perms.len(), 2);
        assert!(perms.iter().all(|p| p.as_str().starts_with("wallet.")));
    }
}

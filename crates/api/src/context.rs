use consult_auth::{Principal, Role};
use consult_core::UserId;

/// Principal context for a request (authenticated user + roles).
///
/// Inserted by the auth middleware; every protected handler extracts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    user_id: UserId,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(user_id: UserId, roles: Vec<Role>) -> Self {
        Self { user_id, roles }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Resolve permissions with the static role policy.
    pub fn principal(&self) -> Principal {
        Principal::from_roles(self.user_id.clone(), self.roles.clone())
    }
}

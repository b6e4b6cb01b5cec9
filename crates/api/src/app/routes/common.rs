use consult_auth::{CommandAuthorization, Permission};

use crate::app::errors;
use crate::authz::authorize_command;
use crate::context::PrincipalContext;

/// Associates required permissions with an operation.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> CmdAuth<C> {
    pub fn new(inner: C, required: &[&'static str]) -> Self {
        Self {
            inner,
            required: required.iter().map(|p| Permission::new(*p)).collect(),
        }
    }

    /// Authorize against the principal and hand back the operation.
    pub fn check(self, principal: &PrincipalContext) -> Result<C, axum::response::Response> {
        authorize_command(principal, &self).map_err(errors::authz_error_to_response)?;
        Ok(self.inner)
    }
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

/// Read-only guard for routes that carry no operation payload.
pub fn require(
    principal: &PrincipalContext,
    permission: &'static str,
) -> Result<(), axum::response::Response> {
    CmdAuth::new((), &[permission]).check(principal)
}

//! Deny-by-default authorization over a resolved [`TenancyContext`].

use super::{permissions::Permission, resolver::TenancyContext};
use crate::auth::AuthError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    PlatformOwner,
    /// Platform owners satisfy this too.
    PlatformStaff,
    /// Requires an active store and the permission in its effective set.
    StorePermission(Permission),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AuthorizationEngine;

impl AuthorizationEngine {
    /// # Errors
    /// `Unauthenticated` for anonymous callers, `Forbidden` otherwise.
    pub fn authorize(&self, context: &TenancyContext, policy: Policy) -> Result<(), AuthError> {
        if !context.is_authenticated() {
            return Err(AuthError::Unauthenticated);
        }
        let allowed = match policy {
            Policy::PlatformOwner => context.platform_owner,
            Policy::PlatformStaff => context.platform_staff || context.platform_owner,
            Policy::StorePermission(permission) => context.has_permission(permission),
        };
        if allowed {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

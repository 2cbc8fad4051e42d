//! Role-set authorization.

use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::{IdentityError, IdentityResult};
use crate::models::{AuthenticatedUser, Role};

/// Roles that may list every user.
pub const LIST_USERS: &[Role] = &[Role::Admin, Role::OrgAdmin];
/// Roles that may create users on someone else's behalf.
pub const CREATE_USER: &[Role] = &[Role::Admin];
/// Roles that may delete users.
pub const DELETE_USER: &[Role] = &[Role::Admin];

#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationPolicy;

impl AuthorizationPolicy {
    /// Allowed iff the subject holds at least one of `required`.
    pub fn authorize(user_roles: &BTreeSet<Role>, required: &[Role]) -> bool {
        required.iter().any(|role| user_roles.contains(role))
    }

    pub fn ensure(subject: &AuthenticatedUser, required: &[Role]) -> IdentityResult<()> {
        if Self::authorize(&subject.roles, required) {
            Ok(())
        } else {
            tracing::warn!(user_id = %subject.id, ?required, "Role check failed");
            Err(IdentityError::Forbidden)
        }
    }

    /// Self-service access: the subject is the target, or an admin.
    pub fn can_access_user(subject: &AuthenticatedUser, target: Uuid) -> bool {
        subject.id == target || subject.is_admin()
    }

    pub fn ensure_can_access_user(subject: &AuthenticatedUser, target: Uuid) -> IdentityResult<()> {
        if Self::can_access_user(subject, target) {
            Ok(())
        } else {
            tracing::warn!(user_id = %subject.id, target = %target, "Access to another user denied");
            Err(IdentityError::Forbidden)
        }
    }
}

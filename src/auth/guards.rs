//! Authorization guards.
//!
//! Pure predicates over an already-resolved identity. They do no I/O, so
//! handlers call them after loading whatever owner id the route refers to.

use super::errors::{ApiAuthError, AuthErrorKind};
use crate::db::{User, UserRole};

pub fn is_admin(user: &User) -> bool {
    user.role == UserRole::Admin
}

/// True when `user` owns the resource (same public id) or is an admin.
pub fn is_self_or_admin(user: &User, owner_uuid: &str) -> bool {
    user.uuid == owner_uuid || is_admin(user)
}

pub fn require_admin(user: &User) -> Result<(), ApiAuthError> {
    if is_admin(user) {
        Ok(())
    } else {
        Err(ApiAuthError::new(AuthErrorKind::InsufficientRole))
    }
}

pub fn require_self_or_admin(user: &User, owner_uuid: &str) -> Result<(), ApiAuthError> {
    if is_self_or_admin(user, owner_uuid) {
        Ok(())
    } else {
        Err(ApiAuthError::new(AuthErrorKind::NotOwner))
    }
}

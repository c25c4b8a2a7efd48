//! Axum extractors for authentication.

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{debug, error};

use super::bearer::bearer_token;
use super::errors::{ApiAuthError, AuthErrorKind};
use super::state::HasAuthBackend;
use super::types::AuthenticatedUser;
use crate::db::{User, UserRole};
use crate::jwt::{Claims, JwtError, TokenKind};

/// Role requirement checked after the identity is resolved.
pub trait RoleConstraint: Send + Sync {
    fn allows(role: UserRole) -> bool;
}

/// Any authenticated user.
pub struct AnyRole;

impl RoleConstraint for AnyRole {
    fn allows(_role: UserRole) -> bool {
        true
    }
}

/// Admins only.
pub struct AdminOnly;

impl RoleConstraint for AdminOnly {
    fn allows(role: UserRole) -> bool {
        role == UserRole::Admin
    }
}

/// Core authentication: bearer token -> verified claims -> current user.
pub(crate) async fn authenticate_request<S>(
    parts: &Parts,
    state: &S,
) -> Result<AuthenticatedUser, AuthErrorKind>
where
    S: HasAuthBackend + Send + Sync,
{
    let token = bearer_token(&parts.headers).ok_or(AuthErrorKind::NotAuthenticated)?;

    let claims = state
        .jwt()
        .validate(token, TokenKind::Access)
        .map_err(|e| match e {
            JwtError::Expired => AuthErrorKind::TokenExpired,
            other => {
                debug!(error = %other, "Rejected access token");
                AuthErrorKind::InvalidToken
            }
        })?;

    let user = resolve_subject(state, &claims).await?;

    Ok(AuthenticatedUser { user, claims })
}

/// Check the denylist and load the token's subject. Shared with the refresh endpoint.
pub(crate) async fn resolve_subject<S>(state: &S, claims: &Claims) -> Result<User, AuthErrorKind>
where
    S: HasAuthBackend + Send + Sync,
{
    let revoked = state
        .db()
        .revoked_tokens()
        .is_revoked(&claims.jti)
        .await
        .map_err(|e| {
            error!("Failed to check token revocation: {}", e);
            AuthErrorKind::DatabaseError
        })?;
    if revoked {
        return Err(AuthErrorKind::TokenRevoked);
    }

    // A deleted user must not resolve to a stale identity
    state
        .db()
        .users()
        .get_by_uuid(&claims.sub)
        .await
        .map_err(|e| {
            error!("Failed to get user: {}", e);
            AuthErrorKind::DatabaseError
        })?
        .ok_or(AuthErrorKind::UserNotFound)
}

/// Extractor for endpoints that require authentication with a role constraint.
///
/// Rejects with 401 when the token is missing or invalid, and 403 when the
/// resolved user's role does not satisfy `R`.
pub struct Auth<R: RoleConstraint = AnyRole> {
    pub user: User,
    pub claims: Claims,
    _role: PhantomData<R>,
}

impl<S, R> FromRequestParts<S> for Auth<R>
where
    S: HasAuthBackend + Send + Sync,
    R: RoleConstraint,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser { user, claims } = authenticate_request(parts, state).await?;

        if !R::allows(user.role) {
            return Err(ApiAuthError::new(AuthErrorKind::InsufficientRole));
        }

        Ok(Auth {
            user,
            claims,
            _role: PhantomData,
        })
    }
}

/// Optional authentication extractor - never fails.
/// Yields None when the token is absent or fails verification for any reason.
pub struct OptionalAuth(pub Option<AuthenticatedUser>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(authenticate_request(parts, state).await.ok()))
    }
}

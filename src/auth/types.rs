//! Authentication user types.

use crate::db::User;
use crate::jwt::Claims;

/// A request identity resolved from a valid access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// The user as currently stored (role and ban state are fresh, not from the token)
    pub user: User,
    /// Claims of the presented access token
    pub claims: Claims,
}

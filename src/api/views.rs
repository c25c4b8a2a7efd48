//! JSON views of a user. Neither carries a password hash.

use serde::Serialize;

use super::error::{ApiError, ResultExt};
use crate::db::{Database, Provider, User, UserRole};

/// The account as its owner (or an admin) sees it, including ban state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub email: String,
    pub name: String,
    pub avatar: String,
    pub bio: String,
    pub role: UserRole,
    pub is_banned: bool,
    pub ban_reason: String,
    pub banned_at: Option<String>,
    pub has_password: bool,
    pub providers: Vec<Provider>,
    pub created_at: String,
}

impl UserView {
    pub fn new(user: User, providers: Vec<Provider>) -> Self {
        Self {
            id: user.uuid,
            username: user.username,
            email: user.email,
            name: user.name,
            avatar: user.avatar,
            bio: user.bio,
            role: user.role,
            is_banned: user.is_banned,
            ban_reason: user.ban_reason,
            banned_at: user.banned_at,
            has_password: user.has_password,
            providers,
            created_at: user.created_at,
        }
    }

    /// Build the view, looking up linked providers.
    pub async fn load(db: &Database, user: User) -> Result<Self, ApiError> {
        let providers = db
            .identities()
            .providers_for(user.id)
            .await
            .db_err("Failed to list linked providers")?;
        Ok(Self::new(user, providers))
    }
}

/// What anyone may see about a user.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: String,
    pub username: String,
    pub name: String,
    pub avatar: String,
    pub bio: String,
    pub role: UserRole,
    pub created_at: String,
}

impl From<User> for PublicProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.uuid,
            username: user.username,
            name: user.name,
            avatar: user.avatar,
            bio: user.bio,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

/// Wrapper matching the `{ "user": ... }` envelope the client expects.
#[derive(Debug, Serialize)]
pub struct UserEnvelope<T: Serialize> {
    pub user: T,
}

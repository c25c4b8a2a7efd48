//! External identity links (OAuth provider accounts attached to local users).

use sqlx::sqlite::SqlitePool;

use super::user::{User, UserStore};

/// Supported external identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Github,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Github => "github",
        }
    }

    /// Parse a provider name as it appears in URLs and the database.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google" => Some(Provider::Google),
            "github" => Some(Provider::Github),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct IdentityStore {
    pool: SqlitePool,
}

impl IdentityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Find the local user linked to a provider account.
    pub async fn find_user(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT user_id FROM external_identities WHERE provider = ? AND provider_user_id = ?",
        )
        .bind(provider.as_str())
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((user_id,)) => UserStore::new(self.pool.clone()).get_by_id(user_id).await,
            None => Ok(None),
        }
    }

    /// Link a provider account to a user.
    ///
    /// Fails with a unique violation if the provider account is linked elsewhere
    /// or the user already holds an identity for this provider.
    pub async fn link(
        &self,
        user_id: i64,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO external_identities (user_id, provider, provider_user_id) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .bind(provider_user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Providers linked to a user, in link order.
    pub async fn providers_for(&self, user_id: i64) -> Result<Vec<Provider>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT provider FROM external_identities WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(p,)| Provider::parse(&p))
            .collect())
    }
}

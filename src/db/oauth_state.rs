//! Pending OAuth authorizations, keyed by CSRF state.

use sqlx::sqlite::SqlitePool;

use super::identity::Provider;

/// How long a started OAuth flow may take before its state is discarded.
const STATE_TTL_MINUTES: i64 = 10;

/// What the callback needs to finish an authorization started earlier.
#[derive(Debug, Clone)]
pub struct PendingOAuth {
    pub provider: Provider,
    pub pkce_verifier: String,
}

#[derive(Clone)]
pub struct OAuthStateStore {
    pool: SqlitePool,
}

impl OAuthStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Remember a started authorization.
    pub async fn store(
        &self,
        state: &str,
        provider: Provider,
        pkce_verifier: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO oauth_states (state, provider, pkce_verifier) VALUES (?, ?, ?)")
            .bind(state)
            .bind(provider.as_str())
            .bind(pkce_verifier)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Take a pending authorization. Single use: the row is deleted whether or
    /// not it has expired. Returns None for unknown, expired or foreign states.
    pub async fn take(
        &self,
        state: &str,
        provider: Provider,
    ) -> Result<Option<PendingOAuth>, sqlx::Error> {
        let row: Option<(String, String, i32)> = sqlx::query_as(
            "DELETE FROM oauth_states WHERE state = ?
             RETURNING provider, pkce_verifier,
                       created_at > datetime('now', ?) AS fresh",
        )
        .bind(state)
        .bind(format!("-{} minutes", STATE_TTL_MINUTES))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(stored_provider, pkce_verifier, fresh)| {
            if fresh == 0 || Provider::parse(&stored_provider) != Some(provider) {
                return None;
            }
            Some(PendingOAuth {
                provider,
                pkce_verifier,
            })
        }))
    }

    /// Remove abandoned authorizations.
    pub async fn cleanup_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE created_at <= datetime('now', ?)")
            .bind(format!("-{} minutes", STATE_TTL_MINUTES))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

//! Denylist of tokens invalidated before their natural expiry (logout).

use sqlx::sqlite::SqlitePool;

use super::unix_now;

#[derive(Clone)]
pub struct RevokedTokenStore {
    pool: SqlitePool,
}

impl RevokedTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Revoke a token by its JWT ID. Revoking twice is a no-op.
    pub async fn revoke(&self, jti: &str, expires_at: u64) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO revoked_tokens (jti, expires_at) VALUES (?, ?)")
            .bind(jti)
            .bind(expires_at as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn is_revoked(&self, jti: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM revoked_tokens WHERE jti = ?")
            .bind(jti)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Drop entries for tokens that have expired anyway.
    pub async fn cleanup_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < ?")
            .bind(unix_now() as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

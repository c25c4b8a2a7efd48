mod code;
mod identity;
mod oauth_state;
mod revoked;
mod user;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::time::{SystemTime, UNIX_EPOCH};

pub use code::{CodeCheck, CodePurpose, VerificationCodeStore};
pub use identity::{IdentityStore, Provider};
pub use oauth_state::{OAuthStateStore, PendingOAuth};
pub use revoked::RevokedTokenStore;
pub use user::{NewUser, ProfileUpdate, UniqueField, User, UserRole, UserStore, unique_violation};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        if version < 2 {
            self.migrate_v2().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                // Username and email uniqueness is enforced here, not by handler pre-checks
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT UNIQUE NOT NULL,
                    username TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    password_hash TEXT,
                    name TEXT NOT NULL,
                    avatar TEXT NOT NULL DEFAULT '',
                    bio TEXT NOT NULL DEFAULT '',
                    role TEXT NOT NULL DEFAULT 'user',
                    is_banned INTEGER NOT NULL DEFAULT 0,
                    ban_reason TEXT NOT NULL DEFAULT '',
                    banned_at TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    CHECK (is_banned = 0 OR length(trim(ban_reason)) > 0)
                )",
                "CREATE INDEX idx_users_uuid ON users(uuid)",
                "CREATE TABLE external_identities (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    provider TEXT NOT NULL,
                    provider_user_id TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE (provider, provider_user_id),
                    UNIQUE (user_id, provider)
                )",
                "CREATE INDEX idx_external_identities_user_id ON external_identities(user_id)",
            ],
        )
        .await
    }

    async fn migrate_v2(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            2,
            &[
                // One pending code per email; a new request replaces the old one
                "CREATE TABLE verification_codes (
                    email TEXT PRIMARY KEY COLLATE NOCASE,
                    code TEXT NOT NULL,
                    purpose TEXT NOT NULL,
                    expires_at INTEGER NOT NULL
                )",
                "CREATE INDEX idx_verification_codes_expires_at ON verification_codes(expires_at)",
                "CREATE TABLE oauth_states (
                    state TEXT PRIMARY KEY,
                    provider TEXT NOT NULL,
                    pkce_verifier TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE INDEX idx_oauth_states_created_at ON oauth_states(created_at)",
                // Denylist of logged-out tokens, kept until the token would expire anyway
                "CREATE TABLE revoked_tokens (
                    jti TEXT PRIMARY KEY,
                    expires_at INTEGER NOT NULL
                )",
                "CREATE INDEX idx_revoked_tokens_expires_at ON revoked_tokens(expires_at)",
            ],
        )
        .await
    }

    /// Get the user store.
    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone())
    }

    /// Get the external identity store.
    pub fn identities(&self) -> IdentityStore {
        IdentityStore::new(self.pool.clone())
    }

    /// Get the verification code store (email verification and password reset).
    pub fn codes(&self) -> VerificationCodeStore {
        VerificationCodeStore::new(self.pool.clone())
    }

    /// Get the OAuth state store.
    pub fn oauth_states(&self) -> OAuthStateStore {
        OAuthStateStore::new(self.pool.clone())
    }

    /// Get the revoked token store.
    pub fn revoked_tokens(&self) -> RevokedTokenStore {
        RevokedTokenStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

use sqlx::sqlite::SqlitePool;

use super::identity::Provider;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "admin" => UserRole::Admin,
            _ => UserRole::User,
        }
    }
}

/// A resolved user identity.
///
/// Carries no password hash: this is the value handed to request
/// handlers. Use [`UserStore::get_password_hash`] where the hash is needed.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub uuid: String,
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
    pub created_at: String,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: String,
    username: String,
    email: String,
    name: String,
    avatar: String,
    bio: String,
    role: String,
    is_banned: i32,
    ban_reason: String,
    banned_at: Option<String>,
    has_password: i32,
    created_at: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            username: row.username,
            email: row.email,
            name: row.name,
            avatar: row.avatar,
            bio: row.bio,
            role: UserRole::from_str(&row.role),
            is_banned: row.is_banned != 0,
            ban_reason: row.ban_reason,
            banned_at: row.banned_at,
            has_password: row.has_password != 0,
            created_at: row.created_at,
        }
    }
}

const USER_COLUMNS: &str = "id, uuid, username, email, name, avatar, bio, role, is_banned, \
     ban_reason, banned_at, password_hash IS NOT NULL AS has_password, created_at";

/// Fields for inserting a new user.
pub struct NewUser<'a> {
    pub uuid: &'a str,
    pub username: &'a str,
    pub email: &'a str,
    pub name: &'a str,
    /// None for accounts created through an external identity provider.
    pub password_hash: Option<&'a str>,
    pub avatar: &'a str,
}

/// New values for the editable profile fields.
pub struct ProfileUpdate<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub name: &'a str,
    pub avatar: &'a str,
    pub bio: &'a str,
    /// Replaces the stored hash when set; None keeps the current one.
    pub password_hash: Option<&'a str>,
}

/// Which unique constraint a failed insert or update collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
    /// The (provider, provider user id) pair is already linked to some user.
    ExternalIdentity,
    /// The user already holds an identity for this provider.
    ProviderSlot,
}

/// Classify a unique-constraint violation reported by SQLite.
pub fn unique_violation(err: &sqlx::Error) -> Option<UniqueField> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    if !db_err.is_unique_violation() {
        return None;
    }

    let message = db_err.message();
    if message.contains("users.username") {
        Some(UniqueField::Username)
    } else if message.contains("users.email") {
        Some(UniqueField::Email)
    } else if message.contains("external_identities.provider_user_id") {
        Some(UniqueField::ExternalIdentity)
    } else if message.contains("external_identities.user_id") {
        Some(UniqueField::ProviderSlot)
    } else {
        None
    }
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, clause);
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Create a new user. Returns the internal user ID.
    ///
    /// A duplicate username or email surfaces as a unique violation; classify it
    /// with [`unique_violation`].
    pub async fn create(&self, user: &NewUser<'_>) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (uuid, username, email, name, password_hash, avatar)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user.uuid)
        .bind(user.username)
        .bind(user.email.to_lowercase())
        .bind(user.name)
        .bind(user.password_hash)
        .bind(user.avatar)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Create a passwordless user together with its first external identity.
    /// Both rows are written in one transaction so the account is never left
    /// without a way to sign in.
    pub async fn create_linked(
        &self,
        user: &NewUser<'_>,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO users (uuid, username, email, name, password_hash, avatar)
             VALUES (?, ?, ?, ?, NULL, ?)",
        )
        .bind(user.uuid)
        .bind(user.username)
        .bind(user.email.to_lowercase())
        .bind(user.name)
        .bind(user.avatar)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        sqlx::query(
            "INSERT INTO external_identities (user_id, provider, provider_user_id) VALUES (?, ?, ?)",
        )
        .bind(id)
        .bind(provider.as_str())
        .bind(provider_user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Get a user by username (case-insensitive).
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        self.fetch_one_where("username = ?", username).await
    }

    /// Get a user by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        self.fetch_one_where("email = ?", email).await
    }

    /// Get a user by username or email, whichever matches.
    pub async fn get_by_login(&self, login: &str) -> Result<Option<User>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM users WHERE username = ? OR email = ? LIMIT 1",
            USER_COLUMNS
        );
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(login)
            .bind(login)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<User>, sqlx::Error> {
        self.fetch_one_where("uuid = ?", uuid).await
    }

    /// Get the stored password hash. None when the user does not exist or has
    /// no local password.
    pub async fn get_password_hash(&self, id: i64) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT password_hash FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|r| r.0))
    }

    /// Replace the password hash.
    pub async fn set_password_hash(&self, id: i64, hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Update the editable profile fields, and the password when a new hash is
    /// given, in a single statement. Role and ban state are not editable here.
    pub async fn update_profile(
        &self,
        id: i64,
        update: &ProfileUpdate<'_>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET username = ?, email = ?, name = ?, avatar = ?, bio = ?,
                password_hash = COALESCE(?, password_hash)
             WHERE id = ?",
        )
        .bind(update.username)
        .bind(update.email.to_lowercase())
        .bind(update.name)
        .bind(update.avatar)
        .bind(update.bio)
        .bind(update.password_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set the avatar only if the user has none yet.
    pub async fn set_avatar_if_empty(&self, id: i64, avatar: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET avatar = ? WHERE id = ? AND avatar = ''")
            .bind(avatar)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set the role for a user.
    pub async fn set_role(&self, id: i64, role: UserRole) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ban a user. The reason must be non-blank (enforced by a CHECK constraint).
    pub async fn ban(&self, id: i64, reason: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET is_banned = 1, ban_reason = ?, banned_at = datetime('now') WHERE id = ?",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Lift a ban.
    pub async fn unban(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET is_banned = 0, ban_reason = '', banned_at = NULL WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Check if a username is free. Advisory only: the unique index is authoritative.
    pub async fn is_username_available(&self, username: &str) -> Result<bool, sqlx::Error> {
        let count: (i32,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 == 0)
    }

    /// Check if an email belongs to an account.
    pub async fn is_email_registered(&self, email: &str) -> Result<bool, sqlx::Error> {
        let count: (i32,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    /// Delete a user by ID. External identities go with it.
    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List all users, oldest first (for the admin panel).
    pub async fn list_all(&self) -> Result<Vec<User>, sqlx::Error> {
        let sql = format!("SELECT {} FROM users ORDER BY created_at, id", USER_COLUMNS);
        let rows: Vec<UserRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(User::from).collect())
    }
}

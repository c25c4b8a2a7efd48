//! Short-lived email verification codes.
//!
//! One pending code per email address. Codes live in the database rather than
//! process memory so they survive restarts and work across instances.

use sqlx::sqlite::SqlitePool;

use super::unix_now;

/// What a verification code may be spent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodePurpose {
    /// Proving ownership of an email before signing up.
    Signup,
    /// Proving ownership of an email before resetting its password.
    Reset,
}

impl CodePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePurpose::Signup => "signup",
            CodePurpose::Reset => "reset",
        }
    }
}

/// Outcome of checking a submitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    /// Code matched and has been consumed.
    Valid,
    /// No code was requested for this email and purpose.
    Missing,
    /// A code existed but had expired; it has been deleted.
    Expired,
    /// A live code exists but the submitted one differs.
    Mismatch,
}

#[derive(Clone)]
pub struct VerificationCodeStore {
    pool: SqlitePool,
}

impl VerificationCodeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a code, replacing any pending code for the same email.
    pub async fn store(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
        expires_at: u64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO verification_codes (email, code, purpose, expires_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(email.to_lowercase())
        .bind(code)
        .bind(purpose.as_str())
        .bind(expires_at as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Check a submitted code. Consumes it on a match and deletes it if expired.
    pub async fn check(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
    ) -> Result<CodeCheck, sqlx::Error> {
        self.check_inner(email, code, purpose, true).await
    }

    /// Check a submitted code without consuming it on a match, so a later step
    /// of the same flow can spend it. Expired codes are still deleted.
    pub async fn peek(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
    ) -> Result<CodeCheck, sqlx::Error> {
        self.check_inner(email, code, purpose, false).await
    }

    async fn check_inner(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
        consume: bool,
    ) -> Result<CodeCheck, sqlx::Error> {
        let email = email.to_lowercase();
        let email = email.as_str();
        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT code, expires_at FROM verification_codes WHERE email = ? AND purpose = ?",
        )
        .bind(email)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some((stored, expires_at)) = row else {
            return Ok(CodeCheck::Missing);
        };

        if unix_now() as i64 > expires_at {
            self.delete(email).await?;
            return Ok(CodeCheck::Expired);
        }

        if stored != code {
            return Ok(CodeCheck::Mismatch);
        }

        if !consume {
            return Ok(CodeCheck::Valid);
        }

        // Only one request may spend a given code
        let result = sqlx::query("DELETE FROM verification_codes WHERE email = ? AND code = ?")
            .bind(email)
            .bind(&stored)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(CodeCheck::Missing);
        }
        Ok(CodeCheck::Valid)
    }

    /// Delete the pending code for an email.
    pub async fn delete(&self, email: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM verification_codes WHERE email = ?")
            .bind(email.to_lowercase())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove all expired codes.
    pub async fn cleanup_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM verification_codes WHERE expires_at < ?")
            .bind(unix_now() as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

//! Input rules for account fields.
//!
//! Each check returns the user-facing message on failure so handlers can pass
//! it straight into a 400 response.

use crate::password::{MAX_PASSWORD_LEN, MIN_PASSWORD_LEN};

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 20;
const MAX_EMAIL_LEN: usize = 254;

pub fn validate_username(username: &str) -> Result<(), &'static str> {
    if username.is_empty() {
        return Err("Username cannot be empty");
    }
    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err("Username must be between 3 and 20 characters");
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err("Username can only contain letters, numbers, and underscores");
    }
    Ok(())
}

/// Loose structural check: one `@`, non-empty local part, a dot in the domain.
pub fn validate_email(email: &str) -> Result<(), &'static str> {
    if email.is_empty() {
        return Err("Email cannot be empty");
    }
    if email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return Err("Invalid email address");
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err("Invalid email address");
    };
    if local.is_empty()
        || domain.contains('@')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || !domain.contains('.')
    {
        return Err("Invalid email address");
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), &'static str> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err("Password must be at least 8 characters");
    }
    if len > MAX_PASSWORD_LEN {
        return Err("Password cannot be longer than 128 characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("a_b_9").is_ok());
        assert!(validate_username("abc").is_ok());
        assert!(validate_username(&"a".repeat(20)).is_ok());

        assert!(validate_username("").is_err());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(21)).is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("dash-ed").is_err());
        assert!(validate_username("ünï").is_err());
    }

    #[test]
    fn test_email_rules() {
        assert!(validate_email("alice@x.com").is_ok());
        assert!(validate_email("a.b+tag@sub.example.org").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("alice").is_err());
        assert!(validate_email("@x.com").is_err());
        assert!(validate_email("alice@x").is_err());
        assert!(validate_email("alice@@x.com").is_err());
        assert!(validate_email("al ice@x.com").is_err());
        assert!(validate_email("alice@.com").is_err());
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_password("Password123!").is_ok());
        assert!(validate_password("12345678").is_ok());
        assert!(validate_password(&"p".repeat(128)).is_ok());

        assert!(validate_password("short").is_err());
        assert!(validate_password(&"p".repeat(129)).is_err());
    }
}

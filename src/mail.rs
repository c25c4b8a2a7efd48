//! Outbound delivery of verification codes.
//!
//! Real delivery (SMTP, a mail API) lives outside this crate and plugs in
//! through [`CodeMailer`]. The default [`LogMailer`] only records that a code
//! was issued; the code itself is logged when dev codes are enabled.

use async_trait::async_trait;
use tracing::info;

use crate::db::CodePurpose;

#[derive(Debug)]
pub enum MailError {
    /// The transport rejected or failed to send the message.
    Delivery(String),
}

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailError::Delivery(msg) => write!(f, "Failed to deliver mail: {}", msg),
        }
    }
}

impl std::error::Error for MailError {}

/// Sends a verification code to an email address.
#[async_trait]
pub trait CodeMailer: Send + Sync {
    async fn send_code(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
    ) -> Result<(), MailError>;
}

/// Logs issued codes instead of sending them.
#[derive(Debug, Default, Clone)]
pub struct LogMailer {
    reveal_codes: bool,
}

impl LogMailer {
    /// `reveal_codes` puts the code itself in the log line (development only).
    pub fn new(reveal_codes: bool) -> Self {
        Self { reveal_codes }
    }

    fn shown_code<'a>(&self, code: &'a str) -> &'a str {
        if self.reveal_codes { code } else { "[redacted]" }
    }
}

#[async_trait]
impl CodeMailer for LogMailer {
    async fn send_code(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
    ) -> Result<(), MailError> {
        info!(
            email = %email,
            purpose = purpose.as_str(),
            code = self.shown_code(code),
            "Verification code issued"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_redacted_unless_revealed() {
        assert_eq!(LogMailer::default().shown_code("123456"), "[redacted]");
        assert_eq!(LogMailer::new(false).shown_code("123456"), "[redacted]");
        assert_eq!(LogMailer::new(true).shown_code("123456"), "123456");
    }

    #[tokio::test]
    async fn test_send_code_succeeds() {
        LogMailer::new(false)
            .send_code("a@x.com", "123456", CodePurpose::Signup)
            .await
            .unwrap();
    }
}

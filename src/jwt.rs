//! JWT token generation and validation.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::unix_now;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Used for routine authenticated requests
    Access,
    /// Used only to obtain new access tokens
    Refresh,
}

/// JWT claims shared by both token kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user UUID)
    pub sub: String,
    /// Token kind
    pub typ: TokenKind,
    /// JWT ID (revocation key)
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Default access token lifetime: 24 hours
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 24 * 60 * 60;

/// Default refresh token lifetime: 7 days
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Longest accepted token lifetime: 1 year
pub const MAX_TOKEN_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_duration: u64,
    refresh_duration: u64,
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The JWT token string
    pub token: String,
    /// JWT ID
    pub jti: String,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
    /// Token duration in seconds
    pub duration: u64,
}

impl JwtConfig {
    /// Create a new JWT configuration with the given secret and default lifetimes.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_duration: ACCESS_TOKEN_DURATION_SECS,
            refresh_duration: REFRESH_TOKEN_DURATION_SECS,
        }
    }

    /// Override the token lifetimes (seconds).
    pub fn with_lifetimes(mut self, access: u64, refresh: u64) -> Self {
        self.access_duration = access;
        self.refresh_duration = refresh;
        self
    }

    pub fn duration(&self, kind: TokenKind) -> u64 {
        match kind {
            TokenKind::Access => self.access_duration,
            TokenKind::Refresh => self.refresh_duration,
        }
    }

    /// Issue a token of the given kind for a user.
    pub fn issue(&self, user_uuid: &str, kind: TokenKind) -> Result<IssuedToken, JwtError> {
        let now = unix_now();
        let duration = self.duration(kind);
        let jti = uuid::Uuid::new_v4().to_string();

        let claims = Claims {
            sub: user_uuid.to_string(),
            typ: kind,
            jti: jti.clone(),
            iat: now,
            exp: now.checked_add(duration).ok_or(JwtError::LifetimeOverflow)?,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(JwtError::Encoding)?;

        Ok(IssuedToken {
            token,
            jti,
            expires_at: claims.exp,
            duration,
        })
    }

    /// Validate a token and check that it is of the expected kind.
    pub fn validate(&self, token: &str, kind: TokenKind) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let token_data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Invalid(e),
            })?;

        if token_data.claims.typ != kind {
            return Err(JwtError::WrongTokenType);
        }

        Ok(token_data.claims)
    }
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Signature valid but past its expiry
    Expired,
    /// Malformed, bad signature or missing claims
    Invalid(jsonwebtoken::errors::Error),
    /// Wrong token type (e.g., using refresh token as access token)
    WrongTokenType,
    /// The configured lifetime puts the expiry past the end of time
    LifetimeOverflow,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::Expired => write!(f, "Token expired"),
            JwtError::Invalid(e) => write!(f, "Invalid token: {}", e),
            JwtError::WrongTokenType => write!(f, "Wrong token type"),
            JwtError::LifetimeOverflow => write!(f, "Token lifetime is out of range"),
        }
    }
}

impl std::error::Error for JwtError {}

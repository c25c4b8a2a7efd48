//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::db::{Database, UserRole};
use crate::jwt::MAX_TOKEN_DURATION_SECS;
use crate::mail::LogMailer;
use crate::oauth::OAuthClientConfig;
use clap::Parser;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

const MIN_JWT_SECRET_LENGTH: usize = 32;

fn token_ttl_parser() -> clap::builder::RangedU64ValueParser<u64> {
    clap::value_parser!(u64).range(1..=MAX_TOKEN_DURATION_SECS)
}

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Proxy header that carries the real client IP.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpHeader {
    /// `CF-Connecting-IP` (Cloudflare)
    CfConnectingIp,
    /// `X-Real-IP` (nginx)
    XRealIp,
    /// First address of `X-Forwarded-For`
    XForwardedFor,
}

impl IpHeader {
    pub fn extractor(self) -> IpExtractor {
        IpExtractor { header: self }
    }
}

/// Reads the client IP from a configured proxy header.
#[derive(Clone, Debug)]
pub struct IpExtractor {
    header: IpHeader,
}

impl From<IpHeader> for IpExtractor {
    fn from(header: IpHeader) -> Self {
        header.extractor()
    }
}

impl IpExtractor {
    pub fn header_name(&self) -> &'static str {
        match self.header {
            IpHeader::CfConnectingIp => "cf-connecting-ip",
            IpHeader::XRealIp => "x-real-ip",
            IpHeader::XForwardedFor => "x-forwarded-for",
        }
    }

    /// Parse the header value into a normalized IP string.
    pub fn extract(&self, value: &str) -> Result<String, &'static str> {
        let candidate = match self.header {
            IpHeader::XForwardedFor => value.split(',').next().unwrap_or_default(),
            IpHeader::CfConnectingIp | IpHeader::XRealIp => value,
        };
        candidate
            .trim()
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| "IP header does not contain a valid address")
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "bulletin",
    about = "Authentication and account service for the bulletin board"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "5000")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE_PATH", default_value = "bulletin.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Access token lifetime in seconds (at most one year)
    #[arg(long, default_value = "86400", value_parser = token_ttl_parser())]
    pub access_token_ttl_secs: u64,

    /// Refresh token lifetime in seconds (at most one year)
    #[arg(long, default_value = "604800", value_parser = token_ttl_parser())]
    pub refresh_token_ttl_secs: u64,

    /// Base URL of the web client (CORS origin and OAuth landing page)
    #[arg(long, env = "CLIENT_URL", default_value = "http://localhost:5173")]
    pub client_url: String,

    /// Public base URL of this server, used to build OAuth redirect URIs
    #[arg(long, env = "PUBLIC_URL", default_value = "http://localhost:5000")]
    pub public_url: String,

    #[arg(long, env = "GOOGLE_CLIENT_ID", hide_env_values = true)]
    pub google_client_id: Option<String>,

    #[arg(long, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    pub google_client_secret: Option<String>,

    #[arg(long, env = "GITHUB_CLIENT_ID", hide_env_values = true)]
    pub github_client_id: Option<String>,

    #[arg(long, env = "GITHUB_CLIENT_SECRET", hide_env_values = true)]
    pub github_client_secret: Option<String>,

    /// Read the client IP from this proxy header instead of the socket address
    #[arg(long, value_enum)]
    pub ip_header: Option<IpHeader>,

    /// Disable per-IP rate limits
    #[arg(long)]
    pub no_rate_limit: bool,

    /// Return verification codes in API responses. Never use in production
    #[arg(long)]
    pub dev_codes: bool,

    /// Grant the admin role to an existing user on startup
    #[arg(long, value_name = "USERNAME")]
    pub promote_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_logging(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // SAFETY: still single-threaded during startup; nothing else reads this variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Parse a base URL argument. Returns None and logs an error if invalid.
pub fn parse_base_url(name: &str, value: &str) -> Option<Url> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
        Ok(_) => {
            error!(argument = %name, url = %value, "URL must use http or https");
            None
        }
        Err(e) => {
            error!(argument = %name, url = %value, error = %e, "Invalid URL");
            None
        }
    }
}

/// Pair up a provider's credentials. Half a pair disables the provider.
fn provider_credentials(
    provider: &str,
    client_id: Option<String>,
    client_secret: Option<String>,
) -> Option<OAuthClientConfig> {
    match (client_id, client_secret) {
        (Some(client_id), Some(client_secret))
            if !client_id.is_empty() && !client_secret.is_empty() =>
        {
            info!(provider = %provider, "OAuth provider enabled");
            Some(OAuthClientConfig {
                client_id,
                client_secret,
                endpoints: None,
            })
        }
        (None, None) => None,
        _ => {
            warn!(provider = %provider, "OAuth provider disabled: client id and secret must both be set");
            None
        }
    }
}

/// Handle the --promote-admin flag. Exits on failure.
pub async fn handle_promote_admin(db: &Database, username: &str) {
    match db.users().get_by_username(username).await {
        Ok(Some(user)) => {
            if let Err(e) = db.users().set_role(user.id, UserRole::Admin).await {
                error!(error = %e, "Failed to promote user");
                std::process::exit(1);
            }
            info!(username = %user.username, "User promoted to admin");
        }
        Ok(None) => {
            error!(username = %username, "Cannot promote: user not found");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "Failed to look up user");
            std::process::exit(1);
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: Args,
    db: Database,
    jwt_secret: String,
    client_url: Url,
    public_url: Url,
) -> ServerConfig {
    if args.dev_codes {
        warn!("Verification codes will be returned in API responses (--dev-codes)");
    }

    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        access_token_ttl_secs: args.access_token_ttl_secs,
        refresh_token_ttl_secs: args.refresh_token_ttl_secs,
        client_url: client_url.as_str().trim_end_matches('/').to_string(),
        public_url,
        google: provider_credentials(
            "google",
            args.google_client_id,
            args.google_client_secret,
        ),
        github: provider_credentials(
            "github",
            args.github_client_id,
            args.github_client_secret,
        ),
        ip_extractor: args.ip_header.map(IpHeader::extractor),
        rate_limit: !args.no_rate_limit,
        dev_codes: args.dev_codes,
        mailer: Arc::new(LogMailer::new(args.dev_codes)),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

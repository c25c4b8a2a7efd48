pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod mail;
pub mod oauth;
pub mod password;
pub mod rate_limit;
pub mod validation;

use api::{ApiContext, create_api_router};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
};
use db::{Database, Provider};
use jwt::JwtConfig;
use mail::CodeMailer;
use oauth::{OAuthClient, OAuthClientConfig, OAuthProviders};
use rate_limit::RateLimitConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};
use url::Url;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing tokens
    pub jwt_secret: Vec<u8>,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    /// Base URL of the web client, without trailing slash
    pub client_url: String,
    /// Public base URL of this server (OAuth redirect URIs are built from it)
    pub public_url: Url,
    pub google: Option<OAuthClientConfig>,
    pub github: Option<OAuthClientConfig>,
    /// IP extraction strategy (requires running behind a proxy)
    pub ip_extractor: Option<cli::IpExtractor>,
    /// Whether per-IP rate limits are enforced
    pub rate_limit: bool,
    /// Whether verification codes are echoed in responses
    pub dev_codes: bool,
    pub mailer: Arc<dyn CodeMailer>,
}

fn build_oauth_client(
    provider: Provider,
    config: Option<&OAuthClientConfig>,
    public_url: &Url,
) -> Option<OAuthClient> {
    let config = config?;
    match OAuthClient::new(provider, config, public_url) {
        Ok(client) => Some(client),
        Err(e) => {
            error!(provider = provider.as_str(), error = %e, "OAuth provider disabled");
            None
        }
    }
}

fn cors_layer(client_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    match HeaderValue::from_str(client_url) {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            warn!(client_url = %client_url, "Client URL is not a valid origin; CORS disabled");
            layer
        }
    }
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let jwt = Arc::new(
        JwtConfig::new(&config.jwt_secret)
            .with_lifetimes(config.access_token_ttl_secs, config.refresh_token_ttl_secs),
    );

    let oauth = OAuthProviders {
        google: build_oauth_client(Provider::Google, config.google.as_ref(), &config.public_url),
        github: build_oauth_client(Provider::Github, config.github.as_ref(), &config.public_url),
    };

    let rate_limit = config
        .rate_limit
        .then(|| Arc::new(RateLimitConfig::new(config.ip_extractor.clone())));

    let api_router = create_api_router(ApiContext {
        db: config.db.clone(),
        jwt,
        mailer: config.mailer.clone(),
        dev_codes: config.dev_codes,
        client_url: config.client_url.clone(),
        oauth: Arc::new(oauth),
        rate_limit,
    });

    Router::new()
        .nest("/api", api_router)
        .layer(cors_layer(&config.client_url))
        .layer(TraceLayer::new_for_http())
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database) {
    cleanup::run_cleanup(db).await;
    cleanup::spawn_cleanup_scheduler(db.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    init_cleanup(&config.db).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}

/// Wrap a router in a rate limiting middleware when limits are enabled.
macro_rules! rate_limited {
    ($router:expr, $config:expr, $middleware:path) => {
        match $config {
            Some(config) => $router.layer(axum::middleware::from_fn_with_state(
                config.clone(),
                $middleware,
            )),
            None => $router,
        }
    };
}

mod admin;
mod auth;
mod email;
mod error;
mod json;
mod oauth;
mod users;
mod views;

use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::mail::CodeMailer;
use crate::oauth::OAuthProviders;
use crate::rate_limit::RateLimitConfig;

pub use error::{ApiError, ResultExt};
pub use views::{PublicProfile, UserEnvelope, UserView};

/// Everything the API handlers share.
#[derive(Clone)]
pub struct ApiContext {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub mailer: Arc<dyn CodeMailer>,
    pub dev_codes: bool,
    pub client_url: String,
    pub oauth: Arc<OAuthProviders>,
    pub rate_limit: Option<Arc<RateLimitConfig>>,
}

/// Create the API router.
pub fn create_api_router(ctx: ApiContext) -> Router {
    let auth_state = auth::AuthState {
        db: ctx.db.clone(),
        jwt: ctx.jwt.clone(),
        rate_limit: ctx.rate_limit.clone(),
    };

    let oauth_state = oauth::OAuthState {
        db: ctx.db.clone(),
        jwt: ctx.jwt.clone(),
        providers: ctx.oauth,
        client_url: ctx.client_url,
        rate_limit: ctx.rate_limit.clone(),
    };

    let email_state = email::EmailState {
        db: ctx.db.clone(),
        mailer: ctx.mailer,
        dev_codes: ctx.dev_codes,
        rate_limit: ctx.rate_limit,
    };

    let users_state = users::UsersState {
        db: ctx.db.clone(),
        jwt: ctx.jwt.clone(),
    };

    let admin_state = admin::AdminState {
        db: ctx.db,
        jwt: ctx.jwt,
    };

    Router::new()
        .nest(
            "/auth",
            auth::router(auth_state).merge(oauth::router(oauth_state)),
        )
        .nest("/email", email::router(email_state))
        .nest("/users", users::router(users_state))
        .nest("/admin", admin::router(admin_state))
}

//! OAuth sign-in.
//!
//! - GET `/{provider}` - Redirect to the provider's consent page
//! - GET `/{provider}/callback` - Finish sign-in and hand tokens to the client
//!
//! The callback always answers with a redirect to the client: tokens in the
//! URL fragment on success, `/login?error=oauth_failed` otherwise.

use axum::{
    Router,
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::auth::issue_pair;
use super::error::{ApiError, ResultExt};
use crate::db::{Database, Provider};
use crate::jwt::JwtConfig;
use crate::oauth::{OAuthClient, OAuthProviders, resolve};
use crate::rate_limit::{RateLimitConfig, rate_limit_login};

#[derive(Clone)]
pub struct OAuthState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub providers: Arc<OAuthProviders>,
    /// Base URL of the single-page client.
    pub client_url: String,
    pub rate_limit: Option<Arc<RateLimitConfig>>,
}

pub fn router(state: OAuthState) -> Router {
    // Each start stores a pending state row; counted against the login budget
    let begin = rate_limited!(
        Router::new()
            .route("/{provider}", get(start))
            .with_state(state.clone()),
        &state.rate_limit,
        rate_limit_login
    );

    Router::new()
        .route("/{provider}/callback", get(callback))
        .with_state(state)
        .merge(begin)
}

fn enabled_client<'a>(state: &'a OAuthState, provider: &str) -> Result<&'a OAuthClient, ApiError> {
    Provider::parse(provider)
        .and_then(|p| state.providers.get(p))
        .ok_or_else(|| ApiError::not_found("Unknown sign-in provider"))
}

async fn start(
    State(state): State<OAuthState>,
    Path(provider): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let client = enabled_client(&state, &provider)?;
    let authorization = client.authorization_url();

    state
        .db
        .oauth_states()
        .store(
            &authorization.state,
            client.provider(),
            &authorization.pkce_verifier,
        )
        .await
        .db_err("Failed to store OAuth state")?;

    Ok(Redirect::to(&authorization.url))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn callback(
    State(state): State<OAuthState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    let client = enabled_client(&state, &provider)?;

    match finish(&state, client, query).await {
        Ok(target) => Ok(Redirect::to(&target).into_response()),
        Err(reason) => {
            warn!(provider = %provider, reason = %reason, "OAuth sign-in failed");
            Ok(Redirect::to(&failure_url(&state.client_url)).into_response())
        }
    }
}

/// Run the callback steps, returning the success redirect or a loggable reason.
async fn finish(
    state: &OAuthState,
    client: &OAuthClient,
    query: CallbackQuery,
) -> Result<String, String> {
    if let Some(error) = query.error {
        return Err(format!("provider returned error: {}", error));
    }
    let (Some(code), Some(csrf_state)) = (query.code, query.state) else {
        return Err("missing code or state".into());
    };

    let pending = state
        .db
        .oauth_states()
        .take(&csrf_state, client.provider())
        .await
        .map_err(|e| e.to_string())?
        .ok_or("unknown or expired state")?;

    let access_token = client
        .exchange_code(&code, &pending.pkce_verifier)
        .await
        .map_err(|e| e.to_string())?;
    let assertion = client
        .fetch_assertion(&access_token)
        .await
        .map_err(|e| e.to_string())?;

    let user = resolve(&state.db, &assertion)
        .await
        .map_err(|e| e.to_string())?
        .into_user();

    let (token, refresh_token) =
        issue_pair(&state.jwt, &user.uuid).map_err(|e| e.to_string())?;

    info!(
        username = %user.username,
        provider = client.provider().as_str(),
        "User signed in with OAuth"
    );

    Ok(success_url(&state.client_url, &token, &refresh_token))
}

fn success_url(client_url: &str, token: &str, refresh_token: &str) -> String {
    let fragment = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("token", token)
        .append_pair("refreshToken", refresh_token)
        .finish();
    format!("{}/auth/callback#{}", client_url.trim_end_matches('/'), fragment)
}

fn failure_url(client_url: &str) -> String {
    format!("{}/login?error=oauth_failed", client_url.trim_end_matches('/'))
}

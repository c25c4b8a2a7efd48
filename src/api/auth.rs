//! Credential endpoints.
//!
//! - POST `/register` - Create a password account and sign in
//! - POST `/login` - Sign in with username or email and password
//! - POST `/refresh` - Exchange a refresh token for a new access token
//! - GET `/me` - Current identity, including ban state
//! - POST `/logout` - Revoke the presented access token (and refresh token, if given)
//! - POST `/verify-password` - Re-authentication gate for sensitive actions
//! - POST `/check-username` - Username availability hint
//! - POST `/find-account` - Look up a username by email
//! - POST `/reset-password` - Set a new password using an emailed reset code

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::email::check_code;
use super::error::{ApiError, ResultExt, require_field};
use super::json::ApiJson;
use super::views::{UserEnvelope, UserView};
use crate::auth::{ApiAuthError, Auth, resolve_subject};
use crate::db::{CodePurpose, Database, NewUser, UniqueField, User, unique_violation};
use crate::impl_has_auth_backend;
use crate::jwt::{JwtConfig, JwtError, TokenKind};
use crate::password;
use crate::rate_limit::{
    RateLimitConfig, rate_limit_login, rate_limit_recovery, rate_limit_register,
};
use crate::validation::{validate_email, validate_password, validate_username};

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub rate_limit: Option<Arc<RateLimitConfig>>,
}

impl_has_auth_backend!(AuthState);

pub fn router(state: AuthState) -> Router {
    let register = rate_limited!(
        Router::new()
            .route("/register", post(register))
            .with_state(state.clone()),
        &state.rate_limit,
        rate_limit_register
    );

    let login = rate_limited!(
        Router::new()
            .route("/login", post(login))
            .with_state(state.clone()),
        &state.rate_limit,
        rate_limit_login
    );

    let recovery = rate_limited!(
        Router::new()
            .route("/find-account", post(find_account))
            .route("/reset-password", post(reset_password))
            .with_state(state.clone()),
        &state.rate_limit,
        rate_limit_recovery
    );

    Router::new()
        .route("/refresh", post(refresh))
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/verify-password", post(verify_password))
        .route("/check-username", post(check_username))
        .with_state(state)
        .merge(register)
        .merge(login)
        .merge(recovery)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AuthResponse {
    message: &'static str,
    token: String,
    refresh_token: String,
    user: UserView,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// Issue an access/refresh pair for a user.
pub(super) fn issue_pair(jwt: &JwtConfig, user_uuid: &str) -> Result<(String, String), ApiError> {
    let access = jwt
        .issue(user_uuid, TokenKind::Access)
        .internal_err("Failed to issue access token")?;
    let refresh = jwt
        .issue(user_uuid, TokenKind::Refresh)
        .internal_err("Failed to issue refresh token")?;
    Ok((access.token, refresh.token))
}

async fn signed_in(
    state: &AuthState,
    user: User,
    message: &'static str,
) -> Result<AuthResponse, ApiError> {
    let (token, refresh_token) = issue_pair(&state.jwt, &user.uuid)?;
    Ok(AuthResponse {
        message,
        token,
        refresh_token,
        user: UserView::load(&state.db, user).await?,
    })
}

/// Map a unique-constraint violation on the users table to a 400.
pub(super) fn duplicate_error(e: sqlx::Error, context: &str) -> ApiError {
    match unique_violation(&e) {
        Some(UniqueField::Username) => ApiError::duplicate("Username is already taken"),
        Some(UniqueField::Email) => ApiError::duplicate("Email is already registered"),
        _ => ApiError::db_error(context, e),
    }
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
    name: Option<String>,
}

async fn register(
    State(state): State<AuthState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = require_field(payload.username.as_deref(), "Username")?.trim();
    let email = require_field(payload.email.as_deref(), "Email")?
        .trim()
        .to_lowercase();
    let password = require_field(payload.password.as_deref(), "Password")?;

    validate_username(username).map_err(ApiError::bad_request)?;
    validate_email(&email).map_err(ApiError::bad_request)?;
    validate_password(password).map_err(ApiError::bad_request)?;

    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(username);

    // Fast-path hints; the unique indexes below are what actually decide
    let users = state.db.users();
    if !users
        .is_username_available(username)
        .await
        .db_err("Failed to check username availability")?
    {
        return Err(ApiError::duplicate("Username is already taken"));
    }
    if users
        .is_email_registered(&email)
        .await
        .db_err("Failed to check email")?
    {
        return Err(ApiError::duplicate("Email is already registered"));
    }

    let password_hash = password::hash_async(password.to_string())
        .await
        .internal_err("Failed to hash password")?;

    let uuid = uuid::Uuid::new_v4().to_string();
    let id = users
        .create(&NewUser {
            uuid: &uuid,
            username,
            email: &email,
            name,
            password_hash: Some(password_hash.as_str()),
            avatar: "",
        })
        .await
        .map_err(|e| duplicate_error(e, "Failed to create user"))?;

    let user = users
        .get_by_id(id)
        .await
        .db_err("Failed to load new user")?
        .ok_or_else(|| ApiError::internal("User vanished after creation"))?;

    info!(username = %user.username, "User registered");

    let response = signed_in(&state, user, "Registration complete").await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Deserialize)]
struct LoginRequest {
    /// Username or email
    #[serde(alias = "email", alias = "login")]
    username: Option<String>,
    password: Option<String>,
}

const BAD_CREDENTIALS: &str = "Invalid username or password";

async fn login(
    State(state): State<AuthState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(login), Some(password)) = (
        payload.username.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        payload.password.as_deref().filter(|s| !s.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Username and password are required"));
    };

    let Some(user) = state
        .db
        .users()
        .get_by_login(login)
        .await
        .db_err("Failed to look up user")?
    else {
        warn!("Login failed: unknown user");
        return Err(ApiError::unauthorized(BAD_CREDENTIALS));
    };

    // Accounts created through a provider have no password to check
    let Some(hash) = state
        .db
        .users()
        .get_password_hash(user.id)
        .await
        .db_err("Failed to load password hash")?
    else {
        warn!(username = %user.username, "Login failed: account has no password");
        return Err(ApiError::unauthorized(BAD_CREDENTIALS));
    };

    let valid = password::verify_async(password.to_string(), hash)
        .await
        .internal_err("Failed to verify password")?;
    if !valid {
        warn!(username = %user.username, "Login failed: wrong password");
        return Err(ApiError::unauthorized(BAD_CREDENTIALS));
    }

    info!(username = %user.username, "User logged in");

    Ok(Json(signed_in(&state, user, "Login successful").await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: Option<String>,
}

#[derive(Serialize)]
struct RefreshResponse {
    token: String,
}

/// New access token for a valid, unexpired, unrevoked refresh token whose
/// subject still exists. Credentials are not re-checked.
async fn refresh(
    State(state): State<AuthState>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = payload
        .refresh_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Refresh token required"))?;

    let claims = state
        .jwt
        .validate(token, TokenKind::Refresh)
        .map_err(|e| match e {
            JwtError::Expired => ApiError::unauthorized("Refresh token expired"),
            _ => ApiError::unauthorized("Invalid refresh token"),
        })?;

    let user = resolve_subject(&state, &claims)
        .await
        .map_err(ApiAuthError::from)?;

    let access = state
        .jwt
        .issue(&user.uuid, TokenKind::Access)
        .internal_err("Failed to issue access token")?;

    Ok(Json(RefreshResponse {
        token: access.token,
    }))
}

async fn me(
    State(state): State<AuthState>,
    auth: Auth,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(UserEnvelope {
        user: UserView::load(&state.db, auth.user).await?,
    }))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LogoutRequest {
    refresh_token: Option<String>,
}

async fn logout(
    State(state): State<AuthState>,
    auth: Auth,
    payload: Option<ApiJson<LogoutRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let revoked = state.db.revoked_tokens();

    revoked
        .revoke(&auth.claims.jti, auth.claims.exp)
        .await
        .db_err("Failed to revoke access token")?;

    let payload = payload.map(|ApiJson(p)| p).unwrap_or_default();
    if let Some(refresh_token) = payload.refresh_token.as_deref() {
        // Only the caller's own, still-valid refresh token is worth revoking
        match state.jwt.validate(refresh_token, TokenKind::Refresh) {
            Ok(claims) if claims.sub == auth.user.uuid => {
                revoked
                    .revoke(&claims.jti, claims.exp)
                    .await
                    .db_err("Failed to revoke refresh token")?;
            }
            Ok(_) => warn!(username = %auth.user.username, "Logout with foreign refresh token"),
            Err(_) => {}
        }
    }

    info!(username = %auth.user.username, "User logged out");

    Ok(Json(MessageResponse {
        message: "Logged out",
    }))
}

#[derive(Deserialize)]
struct VerifyPasswordRequest {
    password: Option<String>,
}

async fn verify_password(
    State(state): State<AuthState>,
    auth: Auth,
    ApiJson(payload): ApiJson<VerifyPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let password = payload
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("Password is required"))?;

    let hash = state
        .db
        .users()
        .get_password_hash(auth.user.id)
        .await
        .db_err("Failed to load password hash")?
        .ok_or_else(|| ApiError::unauthorized("This account has no password"))?;

    let valid = password::verify_async(password, hash)
        .await
        .internal_err("Failed to verify password")?;
    if !valid {
        return Err(ApiError::unauthorized("Password does not match"));
    }

    Ok(Json(MessageResponse {
        message: "Password verified",
    }))
}

#[derive(Deserialize)]
struct CheckUsernameRequest {
    username: Option<String>,
}

#[derive(Serialize)]
struct CheckUsernameResponse {
    available: bool,
}

async fn check_username(
    State(state): State<AuthState>,
    ApiJson(payload): ApiJson<CheckUsernameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = require_field(payload.username.as_deref(), "Username")?.trim();
    validate_username(username).map_err(ApiError::bad_request)?;

    let available = state
        .db
        .users()
        .is_username_available(username)
        .await
        .db_err("Failed to check username availability")?;

    Ok(Json(CheckUsernameResponse { available }))
}

#[derive(Deserialize)]
struct FindAccountRequest {
    email: Option<String>,
}

#[derive(Serialize)]
struct FindAccountResponse {
    message: &'static str,
    username: String,
}

async fn find_account(
    State(state): State<AuthState>,
    ApiJson(payload): ApiJson<FindAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = require_field(payload.email.as_deref(), "Email")?.trim();

    let user = state
        .db
        .users()
        .get_by_email(email)
        .await
        .db_err("Failed to look up account")?
        .ok_or_else(|| ApiError::not_found("No account is registered with this email"))?;

    Ok(Json(FindAccountResponse {
        message: "Account found",
        username: user.username,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetPasswordRequest {
    email: Option<String>,
    code: Option<String>,
    new_password: Option<String>,
}

async fn reset_password(
    State(state): State<AuthState>,
    ApiJson(payload): ApiJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = require_field(payload.email.as_deref(), "Email")?.trim();
    let code = require_field(payload.code.as_deref(), "Verification code")?.trim();
    let new_password = require_field(payload.new_password.as_deref(), "New password")?;
    validate_password(new_password).map_err(ApiError::bad_request)?;

    let user = state
        .db
        .users()
        .get_by_email(email)
        .await
        .db_err("Failed to look up account")?
        .ok_or_else(|| ApiError::not_found("No account is registered with this email"))?;

    let outcome = state
        .db
        .codes()
        .check(email, code, CodePurpose::Reset)
        .await
        .db_err("Failed to check verification code")?;
    check_code(outcome)?;

    let hash = password::hash_async(new_password.to_string())
        .await
        .internal_err("Failed to hash password")?;
    state
        .db
        .users()
        .set_password_hash(user.id, &hash)
        .await
        .db_err("Failed to update password")?;

    info!(username = %user.username, "Password reset");

    Ok(Json(MessageResponse {
        message: "Password has been reset",
    }))
}

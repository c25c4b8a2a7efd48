//! User account endpoints.
//!
//! - GET `/check/{username}` - Look up a user by username (authenticated)
//! - GET `/{uuid}` - Profile (public view, or full view for self and admins)
//! - PUT `/{uuid}` - Update profile (self or admin)
//! - DELETE `/{uuid}` - Delete account (self or admin)

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::auth::duplicate_error;
use super::error::{ApiError, ResultExt, validate_uuid};
use super::json::ApiJson;
use super::views::{PublicProfile, UserEnvelope, UserView};
use crate::auth::{Auth, OptionalAuth, is_self_or_admin, require_self_or_admin};
use crate::db::{Database, ProfileUpdate, User};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::password;
use crate::validation::{validate_email, validate_password, validate_username};

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
}

impl_has_auth_backend!(UsersState);

pub fn router(state: UsersState) -> Router {
    Router::new()
        .route("/check/{username}", get(check_user))
        .route(
            "/{uuid}",
            get(get_profile).put(update_profile).delete(delete_user),
        )
        .with_state(state)
}

impl User {
    /// Gate for content-creating actions. A banned user is still
    /// authenticated but may not create anything.
    pub fn ensure_not_banned(&self) -> Result<(), ApiError> {
        if self.is_banned {
            return Err(ApiError::forbidden(format!(
                "Your account has been suspended: {}",
                self.ban_reason
            )));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct CheckUserResponse {
    exists: bool,
    username: String,
}

async fn check_user(
    State(state): State<UsersState>,
    _auth: Auth,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .users()
        .get_by_username(username.trim())
        .await
        .db_err("Failed to look up user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(CheckUserResponse {
        exists: true,
        username: user.username,
    }))
}

/// Public profile for anyone. The owner and admins get the full account view.
async fn get_profile(
    State(state): State<UsersState>,
    OptionalAuth(viewer): OptionalAuth,
    Path(uuid): Path<String>,
) -> Result<Response, ApiError> {
    validate_uuid(&uuid)?;

    let user = state
        .db
        .users()
        .get_by_uuid(&uuid)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let full_view = viewer.is_some_and(|v| is_self_or_admin(&v.user, &user.uuid));
    if full_view {
        return Ok(Json(UserEnvelope {
            user: UserView::load(&state.db, user).await?,
        })
        .into_response());
    }

    Ok(Json(UserEnvelope {
        user: PublicProfile::from(user),
    })
    .into_response())
}

/// Profile fields a user may change. Roles change only through the admin
/// API, so a `role` key in the body is ignored like any other unknown key.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest {
    username: Option<String>,
    email: Option<String>,
    name: Option<String>,
    avatar: Option<String>,
    bio: Option<String>,
    current_password: Option<String>,
    new_password: Option<String>,
}

async fn update_profile(
    State(state): State<UsersState>,
    auth: Auth,
    Path(uuid): Path<String>,
    ApiJson(payload): ApiJson<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_self_or_admin(&auth.user, &uuid)?;
    validate_uuid(&uuid)?;

    let users = state.db.users();
    let target = users
        .get_by_uuid(&uuid)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let username = match payload.username.as_deref().map(str::trim) {
        Some(u) if !u.is_empty() => {
            validate_username(u).map_err(ApiError::bad_request)?;
            u.to_string()
        }
        _ => target.username.clone(),
    };
    let email = match payload.email.as_deref().map(str::trim) {
        Some(e) if !e.is_empty() => {
            let e = e.to_lowercase();
            validate_email(&e).map_err(ApiError::bad_request)?;
            e
        }
        _ => target.email.clone(),
    };
    let name = match payload.name.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => target.name.clone(),
    };
    let avatar = payload.avatar.unwrap_or_else(|| target.avatar.clone());
    let bio = payload.bio.unwrap_or_else(|| target.bio.clone());

    if !username.eq_ignore_ascii_case(&target.username)
        && !users
            .is_username_available(&username)
            .await
            .db_err("Failed to check username availability")?
    {
        return Err(ApiError::duplicate("Username is already taken"));
    }
    if email != target.email
        && users
            .is_email_registered(&email)
            .await
            .db_err("Failed to check email")?
    {
        return Err(ApiError::duplicate("Email is already registered"));
    }

    let new_hash = match (payload.current_password, payload.new_password) {
        (None, None) => None,
        (Some(current), Some(new)) if !current.is_empty() && !new.is_empty() => {
            validate_password(&new).map_err(ApiError::bad_request)?;
            let stored = users
                .get_password_hash(target.id)
                .await
                .db_err("Failed to load password hash")?
                .ok_or_else(|| ApiError::unauthorized("This account has no password"))?;
            let valid = password::verify_async(current, stored)
                .await
                .internal_err("Failed to verify password")?;
            if !valid {
                return Err(ApiError::unauthorized("Current password does not match"));
            }
            Some(
                password::hash_async(new)
                    .await
                    .internal_err("Failed to hash password")?,
            )
        }
        _ => {
            return Err(ApiError::bad_request(
                "Both current and new password are required to change password",
            ));
        }
    };

    users
        .update_profile(
            target.id,
            &ProfileUpdate {
                username: &username,
                email: &email,
                name: &name,
                avatar: &avatar,
                bio: &bio,
                password_hash: new_hash.as_deref(),
            },
        )
        .await
        .map_err(|e| duplicate_error(e, "Failed to update profile"))?;

    if new_hash.is_some() {
        info!(username = %username, "Password changed");
    }

    let updated = users
        .get_by_id(target.id)
        .await
        .db_err("Failed to reload user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    info!(
        username = %updated.username,
        by = %auth.user.username,
        "Profile updated"
    );

    Ok(Json(UserEnvelope {
        user: UserView::load(&state.db, updated).await?,
    }))
}

async fn delete_user(
    State(state): State<UsersState>,
    auth: Auth,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_self_or_admin(&auth.user, &uuid)?;
    validate_uuid(&uuid)?;

    let users = state.db.users();
    let target = users
        .get_by_uuid(&uuid)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    // Linked identities go with the row (ON DELETE CASCADE)
    users
        .delete(target.id)
        .await
        .db_err("Failed to delete user")?;

    info!(
        username = %target.username,
        by = %auth.user.username,
        "User deleted"
    );

    Ok(StatusCode::NO_CONTENT)
}

//! Admin API endpoints.
//!
//! All endpoints require admin role.

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, put},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt, validate_uuid};
use super::json::ApiJson;
use super::views::UserView;
use crate::auth::{AdminOnly, Auth};
use crate::db::{Database, User, UserRole};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;

/// State for admin endpoints.
#[derive(Clone)]
pub struct AdminState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
}

impl_has_auth_backend!(AdminState);

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/{uuid}/ban", put(ban_user))
        .route("/users/{uuid}/unban", put(unban_user))
        .route("/users/{uuid}/role", put(set_role))
        .with_state(state)
}

#[derive(Serialize)]
struct AdminUserResponse {
    message: &'static str,
    user: UserView,
}

async fn load_target(db: &Database, uuid: &str) -> Result<User, ApiError> {
    validate_uuid(uuid)?;
    db.users()
        .get_by_uuid(uuid)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

async fn respond(
    db: &Database,
    id: i64,
    message: &'static str,
) -> Result<Json<AdminUserResponse>, ApiError> {
    let user = db
        .users()
        .get_by_id(id)
        .await
        .db_err("Failed to reload user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(AdminUserResponse {
        message,
        user: UserView::load(db, user).await?,
    }))
}

/// List all users, oldest first.
async fn list_users(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .db
        .users()
        .list_all()
        .await
        .db_err("Failed to list users")?;

    let mut views = Vec::with_capacity(users.len());
    for user in users {
        views.push(UserView::load(&state.db, user).await?);
    }

    Ok(Json(views))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BanRequest {
    ban_reason: Option<String>,
}

async fn ban_user(
    State(state): State<AdminState>,
    auth: Auth<AdminOnly>,
    Path(uuid): Path<String>,
    ApiJson(payload): ApiJson<BanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reason = payload
        .ban_reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ApiError::bad_request("Ban reason is required"))?;

    let target = load_target(&state.db, &uuid).await?;
    if target.role == UserRole::Admin {
        return Err(ApiError::forbidden("Admins cannot be banned"));
    }

    state
        .db
        .users()
        .ban(target.id, reason)
        .await
        .db_err("Failed to ban user")?;

    info!(
        username = %target.username,
        by = %auth.user.username,
        reason = %reason,
        "User banned"
    );

    respond(&state.db, target.id, "User banned").await
}

async fn unban_user(
    State(state): State<AdminState>,
    auth: Auth<AdminOnly>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let target = load_target(&state.db, &uuid).await?;

    state
        .db
        .users()
        .unban(target.id)
        .await
        .db_err("Failed to unban user")?;

    info!(username = %target.username, by = %auth.user.username, "User unbanned");

    respond(&state.db, target.id, "User unbanned").await
}

#[derive(Deserialize)]
struct RoleRequest {
    role: Option<String>,
}

async fn set_role(
    State(state): State<AdminState>,
    auth: Auth<AdminOnly>,
    Path(uuid): Path<String>,
    ApiJson(payload): ApiJson<RoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let role = match payload.role.as_deref().map(str::trim) {
        Some("admin") => UserRole::Admin,
        Some("user") => UserRole::User,
        _ => return Err(ApiError::bad_request("Role must be 'user' or 'admin'")),
    };

    let target = load_target(&state.db, &uuid).await?;
    if target.id == auth.user.id {
        return Err(ApiError::bad_request("You cannot change your own role"));
    }

    state
        .db
        .users()
        .set_role(target.id, role)
        .await
        .db_err("Failed to update role")?;

    info!(
        username = %target.username,
        role = role.as_str(),
        by = %auth.user.username,
        "Role changed"
    );

    respond(&state.db, target.id, "Role updated").await
}

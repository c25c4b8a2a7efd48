//! Email verification codes.
//!
//! - POST `/send-verification` - Mail a signup code to an unregistered address
//! - POST `/send-reset-code` - Mail a password reset code to a registered address
//! - POST `/verify-code` - Check a code

use axum::{Json, Router, extract::State, response::IntoResponse, routing::post};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt, require_field};
use super::json::ApiJson;
use crate::db::{CodeCheck, CodePurpose, Database, unix_now};
use crate::mail::CodeMailer;
use crate::rate_limit::{RateLimitConfig, rate_limit_code_send, rate_limit_recovery};
use crate::validation::validate_email;

/// How long an emailed code stays valid.
pub const CODE_TTL_SECS: u64 = 5 * 60;

#[derive(Clone)]
pub struct EmailState {
    pub db: Database,
    pub mailer: Arc<dyn CodeMailer>,
    /// Echo codes back in responses. Development only.
    pub dev_codes: bool,
    pub rate_limit: Option<Arc<RateLimitConfig>>,
}

pub fn router(state: EmailState) -> Router {
    let send = rate_limited!(
        Router::new()
            .route("/send-verification", post(send_verification))
            .route("/send-reset-code", post(send_reset_code))
            .with_state(state.clone()),
        &state.rate_limit,
        rate_limit_code_send
    );

    let verify = rate_limited!(
        Router::new()
            .route("/verify-code", post(verify_code))
            .with_state(state.clone()),
        &state.rate_limit,
        rate_limit_recovery
    );

    send.merge(verify)
}

/// Map a failed code check to the message the client shows.
pub(super) fn check_code(outcome: CodeCheck) -> Result<(), ApiError> {
    match outcome {
        CodeCheck::Valid => Ok(()),
        CodeCheck::Missing => Err(ApiError::bad_request(
            "No verification code was requested for this email",
        )),
        CodeCheck::Expired => Err(ApiError::bad_request("Verification code has expired")),
        CodeCheck::Mismatch => Err(ApiError::bad_request("Verification code does not match")),
    }
}

fn generate_code() -> String {
    rand::rng().random_range(100_000..1_000_000).to_string()
}

#[derive(Deserialize)]
struct SendCodeRequest {
    email: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendCodeResponse {
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dev_code: Option<String>,
}

async fn issue_code(
    state: &EmailState,
    email: &str,
    purpose: CodePurpose,
) -> Result<SendCodeResponse, ApiError> {
    let code = generate_code();

    state
        .db
        .codes()
        .store(email, &code, purpose, unix_now() + CODE_TTL_SECS)
        .await
        .db_err("Failed to store verification code")?;

    state
        .mailer
        .send_code(email, &code, purpose)
        .await
        .internal_err("Failed to send verification code")?;

    info!(purpose = purpose.as_str(), "Verification code sent");

    Ok(SendCodeResponse {
        message: "Verification code sent",
        dev_code: state.dev_codes.then_some(code),
    })
}

fn normalized_email(email: Option<&str>) -> Result<String, ApiError> {
    let email = require_field(email, "Email")?.trim().to_lowercase();
    validate_email(&email).map_err(ApiError::bad_request)?;
    Ok(email)
}

async fn send_verification(
    State(state): State<EmailState>,
    ApiJson(payload): ApiJson<SendCodeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalized_email(payload.email.as_deref())?;

    if state
        .db
        .users()
        .is_email_registered(&email)
        .await
        .db_err("Failed to check email")?
    {
        return Err(ApiError::conflict("Email is already registered"));
    }

    Ok(Json(issue_code(&state, &email, CodePurpose::Signup).await?))
}

async fn send_reset_code(
    State(state): State<EmailState>,
    ApiJson(payload): ApiJson<SendCodeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalized_email(payload.email.as_deref())?;

    if !state
        .db
        .users()
        .is_email_registered(&email)
        .await
        .db_err("Failed to check email")?
    {
        return Err(ApiError::not_found("No account is registered with this email"));
    }

    Ok(Json(issue_code(&state, &email, CodePurpose::Reset).await?))
}

#[derive(Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum PurposeParam {
    #[default]
    Signup,
    Reset,
}

#[derive(Deserialize)]
struct VerifyCodeRequest {
    email: Option<String>,
    code: Option<String>,
    #[serde(default)]
    purpose: PurposeParam,
}

#[derive(Serialize)]
struct VerifyCodeResponse {
    message: &'static str,
    verified: bool,
}

/// Signup codes are spent here. Reset codes are only checked, since
/// `/auth/reset-password` spends them.
async fn verify_code(
    State(state): State<EmailState>,
    ApiJson(payload): ApiJson<VerifyCodeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = require_field(payload.email.as_deref(), "Email")?.trim();
    let code = require_field(payload.code.as_deref(), "Verification code")?.trim();

    let codes = state.db.codes();
    let outcome = match payload.purpose {
        PurposeParam::Signup => codes.check(email, code, CodePurpose::Signup).await,
        PurposeParam::Reset => codes.peek(email, code, CodePurpose::Reset).await,
    }
    .db_err("Failed to check verification code")?;
    check_code(outcome)?;

    Ok(Json(VerifyCodeResponse {
        message: "Email verified",
        verified: true,
    }))
}

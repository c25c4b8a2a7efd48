//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down credential
//! stuffing, signup spam and verification-code flooding.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

use crate::api::ApiError;
use crate::auth::extract_client_ip;
use crate::cli::IpExtractor;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

const LOGIN_PER_MIN: NonZeroU32 = NonZeroU32::new(10).unwrap();
const REGISTER_PER_MIN: NonZeroU32 = NonZeroU32::new(3).unwrap();
const CODE_SEND_PER_MIN: NonZeroU32 = NonZeroU32::new(3).unwrap();
const RECOVERY_PER_MIN: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Rate limiting configuration for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Login attempts: 10 per minute per IP
    pub login: Arc<IpLimiter>,
    /// Registrations: 3 per minute per IP
    pub register: Arc<IpLimiter>,
    /// Verification and reset code emails: 3 per minute per IP
    pub code_send: Arc<IpLimiter>,
    /// Code checks, account lookup and password reset: 10 per minute per IP
    pub recovery: Arc<IpLimiter>,
    /// How to find the client IP (proxy header or socket address)
    pub ip_extractor: Option<IpExtractor>,
}

impl RateLimitConfig {
    pub fn new(ip_extractor: Option<IpExtractor>) -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(Quota::per_minute(LOGIN_PER_MIN))),
            register: Arc::new(RateLimiter::keyed(Quota::per_minute(REGISTER_PER_MIN))),
            code_send: Arc::new(RateLimiter::keyed(Quota::per_minute(CODE_SEND_PER_MIN))),
            recovery: Arc::new(RateLimiter::keyed(Quota::per_minute(RECOVERY_PER_MIN))),
            ip_extractor,
        }
    }
}

async fn check(
    limiter: &IpLimiter,
    ip_extractor: Option<&IpExtractor>,
    request: Request,
    next: Next,
    message: &str,
) -> Response {
    let ip = match extract_client_ip(&request, ip_extractor) {
        Ok(ip) => ip,
        Err(reason) => {
            warn!(reason, "Rejecting request without client IP");
            return ApiError::forbidden("Unable to determine client IP.").into_response();
        }
    };

    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
            ApiError::TooManyRequests(message.to_string()).into_response()
        }
    }
}

/// Middleware for rate limiting login.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(
        &config.login,
        config.ip_extractor.as_ref(),
        request,
        next,
        "Too many login attempts. Please wait before trying again.",
    )
    .await
}

/// Middleware for rate limiting registration.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(
        &config.register,
        config.ip_extractor.as_ref(),
        request,
        next,
        "Too many signup attempts. Please wait before trying again.",
    )
    .await
}

/// Middleware for rate limiting code emails.
pub async fn rate_limit_code_send(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(
        &config.code_send,
        config.ip_extractor.as_ref(),
        request,
        next,
        "Too many code requests. Please wait before trying again.",
    )
    .await
}

/// Middleware for rate limiting account recovery.
pub async fn rate_limit_recovery(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(
        &config.recovery,
        config.ip_extractor.as_ref(),
        request,
        next,
        "Too many requests. Please try again later.",
    )
    .await
}

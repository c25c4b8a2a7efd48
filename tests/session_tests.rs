mod common;

use axum::http::{StatusCode, header};
use bulletin::db::unix_now;
use bulletin::jwt::{Claims, TokenKind};
use common::{JWT_SECRET, PASSWORD, get_request, json_request, setup};
use jsonwebtoken::{EncodingKey, Header};
use serde_json::json;

#[tokio::test]
async fn test_login_with_username_or_email() {
    let t = setup().await;
    t.register("alice", "alice@example.com").await;

    for login in ["alice", "ALICE", "alice@example.com"] {
        let (status, json) = t
            .send(json_request(
                "POST",
                "/api/auth/login",
                None,
                json!({"username": login, "password": PASSWORD}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "login as {}", login);
        assert!(json["token"].as_str().is_some());
        assert!(json["refreshToken"].as_str().is_some());
        assert_eq!(json["user"]["username"], "alice");
    }

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/login",
            None,
            json!({"email": "alice@example.com", "password": PASSWORD}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_login_failures() {
    let t = setup().await;
    t.register("alice", "alice@example.com").await;

    let (status, wrong_password) = t
        .send(json_request(
            "POST",
            "/api/auth/login",
            None,
            json!({"username": "alice", "password": "wrong password"}),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, unknown_user) = t
        .send(json_request(
            "POST",
            "/api/auth/login",
            None,
            json!({"username": "nobody", "password": PASSWORD}),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Same message either way, so usernames cannot be enumerated
    assert_eq!(wrong_password["error"], unknown_user["error"]);

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/login",
            None,
            json!({"username": "alice"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_rejected_for_account_without_password() {
    let t = setup().await;
    t.create_admin("oauthonly").await;

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/login",
            None,
            json!({"username": "oauthonly", "password": PASSWORD}),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_returns_current_identity() {
    let t = setup().await;
    let (token, _, uuid) = t.register("alice", "alice@example.com").await;

    let (status, json) = t.send(get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["id"], uuid.as_str());
    assert_eq!(json["user"]["isBanned"], false);
    assert_eq!(json["user"]["banReason"], "");
    assert!(json["user"]["bannedAt"].is_null());
    assert!(json["user"].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_missing_token_is_401_with_challenge() {
    let t = setup().await;

    let response = t.raw(get_request("/api/auth/me", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Bearer"
    );
    let json = common::body_json(response).await;
    assert_eq!(json["error"], "Not authenticated");
}

#[tokio::test]
async fn test_invalid_and_expired_tokens_have_distinct_messages() {
    let t = setup().await;
    let (_, _, uuid) = t.register("alice", "alice@example.com").await;

    let (status, json) = t.send(get_request("/api/auth/me", Some("garbage"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Invalid token");

    let now = unix_now();
    let claims = Claims {
        sub: uuid,
        typ: TokenKind::Access,
        jti: "expired-jti".into(),
        iat: now - 7200,
        exp: now - 3600,
    };
    let expired = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET),
    )
    .unwrap();

    let (status, json) = t.send(get_request("/api/auth/me", Some(&expired))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Token expired");
}

#[tokio::test]
async fn test_token_signed_with_other_secret_is_rejected() {
    let t = setup().await;
    let (_, _, uuid) = t.register("alice", "alice@example.com").await;

    let forged = bulletin::jwt::JwtConfig::new(b"some-other-secret-of-sufficient-length")
        .issue(&uuid, TokenKind::Access)
        .unwrap()
        .token;

    let (status, json) = t.send(get_request("/api/auth/me", Some(&forged))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Invalid token");
}

#[tokio::test]
async fn test_refresh_issues_working_access_token() {
    let t = setup().await;
    let (_, refresh, uuid) = t.register("alice", "alice@example.com").await;

    let (status, json) = t
        .send(json_request(
            "POST",
            "/api/auth/refresh",
            None,
            json!({"refreshToken": refresh}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = json["token"].as_str().unwrap();

    let (status, json) = t.send(get_request("/api/auth/me", Some(token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["id"], uuid.as_str());
}

#[tokio::test]
async fn test_token_kinds_are_not_interchangeable() {
    let t = setup().await;
    let (access, refresh, _) = t.register("alice", "alice@example.com").await;

    // Access token presented to the refresh endpoint
    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/refresh",
            None,
            json!({"refreshToken": access}),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Refresh token presented as a bearer token
    let (status, _) = t.send(get_request("/api/auth/me", Some(&refresh))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_requires_token() {
    let t = setup().await;
    let (status, _) = t
        .send(json_request("POST", "/api/auth/refresh", None, json!({})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_both_tokens() {
    let t = setup().await;
    let (access, refresh, _) = t.register("alice", "alice@example.com").await;

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/logout",
            Some(&access),
            json!({"refreshToken": refresh}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = t.send(get_request("/api/auth/me", Some(&access))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Token has been revoked");

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/refresh",
            None,
            json!({"refreshToken": refresh}),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A fresh login still works
    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/login",
            None,
            json!({"username": "alice", "password": PASSWORD}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_without_body() {
    let t = setup().await;
    let (access, _, _) = t.register("alice", "alice@example.com").await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/auth/logout")
        .header("authorization", format!("Bearer {}", access))
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, _) = t.send(request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = t.send(get_request("/api/auth/me", Some(&access))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_of_deleted_user_is_rejected() {
    let t = setup().await;
    let (access, refresh, uuid) = t.register("alice", "alice@example.com").await;

    let user = t.db.users().get_by_uuid(&uuid).await.unwrap().unwrap();
    t.db.users().delete(user.id).await.unwrap();

    let (status, json) = t.send(get_request("/api/auth/me", Some(&access))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "User not found");

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/refresh",
            None,
            json!({"refreshToken": refresh}),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_verify_password() {
    let t = setup().await;
    let (access, _, _) = t.register("alice", "alice@example.com").await;

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/verify-password",
            Some(&access),
            json!({"password": PASSWORD}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/verify-password",
            Some(&access),
            json!({"password": "not it at all"}),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/verify-password",
            Some(&access),
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/verify-password",
            None,
            json!({"password": PASSWORD}),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

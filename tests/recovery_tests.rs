mod common;

use axum::http::StatusCode;
use bulletin::db::{CodePurpose, unix_now};
use common::{PASSWORD, RecordingMailer, TestApp, json_request, setup, setup_with};
use serde_json::json;
use std::sync::Arc;

async fn setup_with_mailer() -> (TestApp, Arc<RecordingMailer>) {
    let mailer = Arc::new(RecordingMailer::default());
    let app_mailer = mailer.clone();
    let t = setup_with(move |config| config.mailer = app_mailer).await;
    (t, mailer)
}

#[tokio::test]
async fn test_signup_code_is_single_use() {
    let (t, mailer) = setup_with_mailer().await;

    let (status, json) = t
        .send(json_request(
            "POST",
            "/api/email/send-verification",
            None,
            json!({"email": "new@example.com"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("devCode").is_none());

    let code = mailer.last_code("new@example.com").unwrap();
    assert_eq!(code.len(), 6);

    let verify = json!({"email": "new@example.com", "code": code});
    let (status, json) = t
        .send(json_request("POST", "/api/email/verify-code", None, verify.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["verified"], true);

    let (status, _) = t
        .send(json_request("POST", "/api/email/verify-code", None, verify))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dev_codes_are_echoed() {
    let t = setup_with(|config| config.dev_codes = true).await;

    let (status, json) = t
        .send(json_request(
            "POST",
            "/api/email/send-verification",
            None,
            json!({"email": "new@example.com"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let code = json["devCode"].as_str().unwrap().to_string();

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/email/verify-code",
            None,
            json!({"email": "new@example.com", "code": code}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_verification_for_registered_email_conflicts() {
    let t = setup().await;
    t.register("alice", "alice@example.com").await;

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/email/send-verification",
            None,
            json!({"email": "Alice@Example.com"}),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_wrong_missing_and_expired_codes() {
    let t = setup().await;

    let (status, json) = t
        .send(json_request(
            "POST",
            "/api/email/verify-code",
            None,
            json!({"email": "nobody@example.com", "code": "123456"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json["error"],
        "No verification code was requested for this email"
    );

    t.db.codes()
        .store("late@example.com", "123456", CodePurpose::Signup, unix_now() - 1)
        .await
        .unwrap();
    let (status, json) = t
        .send(json_request(
            "POST",
            "/api/email/verify-code",
            None,
            json!({"email": "late@example.com", "code": "123456"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Verification code has expired");

    t.db.codes()
        .store("typo@example.com", "123456", CodePurpose::Signup, unix_now() + 300)
        .await
        .unwrap();
    let (status, json) = t
        .send(json_request(
            "POST",
            "/api/email/verify-code",
            None,
            json!({"email": "typo@example.com", "code": "654321"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Verification code does not match");
}

#[tokio::test]
async fn test_reset_code_for_unknown_email_is_404() {
    let t = setup().await;

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/email/send-reset-code",
            None,
            json!({"email": "ghost@example.com"}),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_find_account() {
    let t = setup().await;
    t.register("alice", "alice@example.com").await;

    let (status, json) = t
        .send(json_request(
            "POST",
            "/api/auth/find-account",
            None,
            json!({"email": "ALICE@example.com"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["username"], "alice");

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/find-account",
            None,
            json!({"email": "ghost@example.com"}),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let (t, mailer) = setup_with_mailer().await;
    t.register("alice", "alice@example.com").await;

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/email/send-reset-code",
            None,
            json!({"email": "alice@example.com"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let code = mailer.last_code("alice@example.com").unwrap();

    // Checking a reset code does not spend it
    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/email/verify-code",
            None,
            json!({"email": "alice@example.com", "code": code, "purpose": "reset"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/reset-password",
            None,
            json!({"email": "alice@example.com", "code": "000000", "newPassword": "a fresh start"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/reset-password",
            None,
            json!({"email": "alice@example.com", "code": code, "newPassword": "a fresh start"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    // The code is spent
    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/reset-password",
            None,
            json!({"email": "alice@example.com", "code": code, "newPassword": "another one!"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/login",
            None,
            json!({"username": "alice", "password": PASSWORD}),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/login",
            None,
            json!({"username": "alice", "password": "a fresh start"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_signup_code_cannot_reset_password() {
    let t = setup().await;
    t.register("alice", "alice@example.com").await;

    t.db.codes()
        .store("alice@example.com", "123456", CodePurpose::Signup, unix_now() + 300)
        .await
        .unwrap();

    let (status, _) = t
        .send(json_request(
            "POST",
            "/api/auth/reset-password",
            None,
            json!({"email": "alice@example.com", "code": "123456", "newPassword": "a fresh start"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

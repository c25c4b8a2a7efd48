#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode},
};
use bulletin::db::{CodePurpose, Database, NewUser, UserRole};
use bulletin::jwt::{JwtConfig, TokenKind};
use bulletin::mail::{CodeMailer, LogMailer, MailError};
use bulletin::{ServerConfig, create_app};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use url::Url;

pub const JWT_SECRET: &[u8] = b"test-jwt-secret-that-is-long-enough";
pub const CLIENT_URL: &str = "http://localhost:5173";
pub const PASSWORD: &str = "correct horse";

/// Captures codes instead of delivering them.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String, CodePurpose)>>,
}

impl RecordingMailer {
    pub fn last_code(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _, _)| to == email)
            .map(|(_, code, _)| code.clone())
    }
}

#[async_trait]
impl CodeMailer for RecordingMailer {
    async fn send_code(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
    ) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), code.to_string(), purpose));
        Ok(())
    }
}

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub jwt: JwtConfig,
}

pub fn test_config(db: Database) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: JWT_SECRET.to_vec(),
        access_token_ttl_secs: 3600,
        refresh_token_ttl_secs: 7200,
        client_url: CLIENT_URL.to_string(),
        public_url: Url::parse("http://localhost:5000").unwrap(),
        google: None,
        github: None,
        ip_extractor: None,
        rate_limit: false,
        dev_codes: false,
        mailer: Arc::new(LogMailer::default()),
    }
}

pub async fn setup() -> TestApp {
    setup_with(|_| {}).await
}

pub async fn setup_with(configure: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let mut config = test_config(db.clone());
    configure(&mut config);
    TestApp {
        app: create_app(&config),
        db,
        jwt: JwtConfig::new(JWT_SECRET),
    }
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&body).unwrap()
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, body_json(response).await)
    }

    pub async fn raw(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Register through the API and return (access token, refresh token, uuid).
    pub async fn register(&self, username: &str, email: &str) -> (String, String, String) {
        let (status, json) = self
            .send(json_request(
                "POST",
                "/api/auth/register",
                None,
                serde_json::json!({
                    "username": username,
                    "email": email,
                    "password": PASSWORD,
                }),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", json);
        (
            json["token"].as_str().unwrap().to_string(),
            json["refreshToken"].as_str().unwrap().to_string(),
            json["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    /// Insert an admin directly and return (access token, uuid).
    pub async fn create_admin(&self, username: &str) -> (String, String) {
        let uuid = uuid::Uuid::new_v4().to_string();
        let email = format!("{}@admin.test", username);
        let id = self
            .db
            .users()
            .create(&NewUser {
                uuid: &uuid,
                username,
                email: &email,
                name: username,
                password_hash: None,
                avatar: "",
            })
            .await
            .unwrap();
        self.db.users().set_role(id, UserRole::Admin).await.unwrap();
        (self.access_token(&uuid), uuid)
    }

    pub fn access_token(&self, uuid: &str) -> String {
        self.jwt.issue(uuid, TokenKind::Access).unwrap().token
    }
}

//! OAuth 2.0 authorization-code flow with PKCE for Google and GitHub.

use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenResponse, TokenUrl, basic::BasicClient,
};
use serde::Deserialize;
use url::Url;

use super::linker::ExternalAssertion;
use crate::db::Provider;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const GOOGLE_SCOPES: &[&str] = &["openid", "email", "profile"];

const GITHUB_AUTH_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const GITHUB_EMAILS_URL: &str = "https://api.github.com/user/emails";
const GITHUB_SCOPES: &[&str] = &["read:user", "user:email"];

/// GitHub rejects API requests without a User-Agent.
const USER_AGENT: &str = concat!("bulletin/", env!("CARGO_PKG_VERSION"));

/// Client credentials for one provider.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Replaces the provider's public endpoints (self-hosted or test providers).
    pub endpoints: Option<ProviderEndpoints>,
}

/// Where a provider's consent page, token endpoint and profile API live.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub auth_url: String,
    pub token_url: String,
    /// Google userinfo, or GitHub `/user`.
    pub profile_url: String,
    /// GitHub `/user/emails`. Google reports email verification in the profile.
    pub emails_url: Option<String>,
}

impl ProviderEndpoints {
    pub fn defaults(provider: Provider) -> Self {
        match provider {
            Provider::Google => Self {
                auth_url: GOOGLE_AUTH_URL.to_string(),
                token_url: GOOGLE_TOKEN_URL.to_string(),
                profile_url: GOOGLE_USERINFO_URL.to_string(),
                emails_url: None,
            },
            Provider::Github => Self {
                auth_url: GITHUB_AUTH_URL.to_string(),
                token_url: GITHUB_TOKEN_URL.to_string(),
                profile_url: GITHUB_USER_URL.to_string(),
                emails_url: Some(GITHUB_EMAILS_URL.to_string()),
            },
        }
    }
}

/// What the start endpoint needs: where to send the browser, and what to remember.
#[derive(Debug, Clone)]
pub struct AuthorizationStart {
    pub url: String,
    pub state: String,
    pub pkce_verifier: String,
}

/// OAuth errors.
#[derive(Debug)]
pub enum OAuthError {
    /// Invalid client configuration.
    Configuration(String),
    /// Code-for-token exchange failed.
    TokenExchange(String),
    /// Fetching the user profile failed or returned unusable data.
    Profile(String),
}

impl std::fmt::Display for OAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            Self::TokenExchange(msg) => write!(f, "Token exchange error: {}", msg),
            Self::Profile(msg) => write!(f, "Profile fetch error: {}", msg),
        }
    }
}

impl std::error::Error for OAuthError {}

/// A configured provider.
#[derive(Clone)]
pub struct OAuthClient {
    provider: Provider,
    client_id: ClientId,
    client_secret: ClientSecret,
    auth_url: AuthUrl,
    token_url: TokenUrl,
    redirect_url: RedirectUrl,
    profile_url: String,
    emails_url: Option<String>,
    http: reqwest::Client,
}

impl OAuthClient {
    /// Build a client whose callback is `{public_url}/api/auth/{provider}/callback`.
    pub fn new(
        provider: Provider,
        config: &OAuthClientConfig,
        public_url: &Url,
    ) -> Result<Self, OAuthError> {
        let endpoints = config
            .endpoints
            .clone()
            .unwrap_or_else(|| ProviderEndpoints::defaults(provider));
        Self::with_endpoints(provider, config, public_url, endpoints)
    }

    /// Build a client that talks to the given endpoints instead of the provider's own.
    pub fn with_endpoints(
        provider: Provider,
        config: &OAuthClientConfig,
        public_url: &Url,
        endpoints: ProviderEndpoints,
    ) -> Result<Self, OAuthError> {
        let redirect = format!(
            "{}/api/auth/{}/callback",
            public_url.as_str().trim_end_matches('/'),
            provider.as_str()
        );

        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| OAuthError::Configuration(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            provider,
            client_id: ClientId::new(config.client_id.clone()),
            client_secret: ClientSecret::new(config.client_secret.clone()),
            auth_url: AuthUrl::new(endpoints.auth_url)
                .map_err(|e| OAuthError::Configuration(format!("invalid auth URL: {}", e)))?,
            token_url: TokenUrl::new(endpoints.token_url)
                .map_err(|e| OAuthError::Configuration(format!("invalid token URL: {}", e)))?,
            redirect_url: RedirectUrl::new(redirect).map_err(|e| {
                OAuthError::Configuration(format!("invalid redirect URL: {}", e))
            })?,
            profile_url: endpoints.profile_url,
            emails_url: endpoints.emails_url,
            http,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn redirect_url(&self) -> &str {
        self.redirect_url.as_str()
    }

    /// Create the provider authorization URL with a fresh CSRF state and PKCE challenge.
    pub fn authorization_url(&self) -> AuthorizationStart {
        let client = BasicClient::new(self.client_id.clone())
            .set_client_secret(self.client_secret.clone())
            .set_auth_uri(self.auth_url.clone())
            .set_redirect_uri(self.redirect_url.clone());

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let scopes = match self.provider {
            Provider::Google => GOOGLE_SCOPES,
            Provider::Github => GITHUB_SCOPES,
        };

        let mut request = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge);
        for scope in scopes {
            request = request.add_scope(Scope::new((*scope).to_string()));
        }

        let (url, csrf_token) = request.url();

        AuthorizationStart {
            url: url.to_string(),
            state: csrf_token.secret().clone(),
            pkce_verifier: pkce_verifier.secret().clone(),
        }
    }

    /// Exchange an authorization code for a provider access token.
    pub async fn exchange_code(&self, code: &str, pkce_verifier: &str) -> Result<String, OAuthError> {
        let client = BasicClient::new(self.client_id.clone())
            .set_client_secret(self.client_secret.clone())
            .set_token_uri(self.token_url.clone())
            .set_redirect_uri(self.redirect_url.clone());

        let token = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| OAuthError::TokenExchange(e.to_string()))?;

        Ok(token.access_token().secret().clone())
    }

    /// Fetch the user's profile and turn it into a linkable assertion.
    pub async fn fetch_assertion(&self, access_token: &str) -> Result<ExternalAssertion, OAuthError> {
        match self.provider {
            Provider::Google => self.fetch_google(access_token).await,
            Provider::Github => self.fetch_github(access_token).await,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T, OAuthError> {
        self.http
            .get(url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| OAuthError::Profile(e.to_string()))?
            .json::<T>()
            .await
            .map_err(|e| OAuthError::Profile(e.to_string()))
    }

    async fn fetch_google(&self, access_token: &str) -> Result<ExternalAssertion, OAuthError> {
        let info: GoogleUserInfo = self.get_json(&self.profile_url, access_token).await?;
        Ok(info.into_assertion())
    }

    async fn fetch_github(&self, access_token: &str) -> Result<ExternalAssertion, OAuthError> {
        let user: GithubUser = self.get_json(&self.profile_url, access_token).await?;

        // The profile email is often hidden and never marked verified; ask
        // for the verified primary one
        let emails: Vec<GithubEmail> = match &self.emails_url {
            Some(url) => match self.get_json(url, access_token).await {
                Ok(emails) => emails,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to fetch GitHub emails");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Ok(user.into_assertion(&emails))
    }
}

/// The configured providers. A provider without credentials stays disabled.
#[derive(Clone, Default)]
pub struct OAuthProviders {
    pub google: Option<OAuthClient>,
    pub github: Option<OAuthClient>,
}

impl OAuthProviders {
    pub fn get(&self, provider: Provider) -> Option<&OAuthClient> {
        match provider {
            Provider::Google => self.google.as_ref(),
            Provider::Github => self.github.as_ref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

impl GoogleUserInfo {
    fn into_assertion(self) -> ExternalAssertion {
        ExternalAssertion {
            provider: Provider::Google,
            provider_user_id: self.sub,
            email: self.email.unwrap_or_default(),
            email_verified: self.email_verified,
            display_name: self.name.unwrap_or_default(),
            avatar_url: self.picture,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: u64,
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    verified: bool,
}

impl GithubUser {
    /// Email preference: verified primary, then public profile email (not
    /// verified), then the no-reply address GitHub assigns every account.
    fn into_assertion(self, emails: &[GithubEmail]) -> ExternalAssertion {
        let (email, email_verified) = emails
            .iter()
            .find(|e| e.primary && e.verified)
            .map(|e| (e.email.clone(), true))
            .or(self.email.filter(|e| !e.is_empty()).map(|e| (e, false)))
            .unwrap_or_else(|| (format!("{}@users.noreply.github.com", self.login), true));

        ExternalAssertion {
            provider: Provider::Github,
            provider_user_id: self.id.to_string(),
            email,
            email_verified,
            display_name: self.name.unwrap_or_else(|| self.login.clone()),
            avatar_url: self.avatar_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OAuthClientConfig {
        OAuthClientConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            endpoints: None,
        }
    }

    #[test]
    fn test_authorization_url_carries_state_and_pkce() {
        let public_url = Url::parse("https://board.example/").unwrap();
        let client = OAuthClient::new(Provider::Github, &config(), &public_url).unwrap();

        assert_eq!(
            client.redirect_url(),
            "https://board.example/api/auth/github/callback"
        );

        let start = client.authorization_url();
        let url = Url::parse(&start.url).unwrap();
        assert!(start.url.starts_with(GITHUB_AUTH_URL));

        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params.get("state"), Some(&start.state));
        assert_eq!(params.get("client_id").map(String::as_str), Some("client-id"));
        assert_eq!(
            params.get("code_challenge_method").map(String::as_str),
            Some("S256")
        );
        assert!(!start.pkce_verifier.is_empty());
    }

    #[test]
    fn test_states_are_random() {
        let public_url = Url::parse("http://localhost:5000").unwrap();
        let client = OAuthClient::new(Provider::Google, &config(), &public_url).unwrap();

        assert_ne!(client.authorization_url().state, client.authorization_url().state);
    }

    #[test]
    fn test_github_email_preference() {
        let user = || GithubUser {
            id: 42,
            login: "octo".to_string(),
            name: None,
            email: Some("public@x.com".to_string()),
            avatar_url: None,
        };
        let emails = vec![
            GithubEmail {
                email: "other@x.com".to_string(),
                primary: false,
                verified: true,
            },
            GithubEmail {
                email: "primary@x.com".to_string(),
                primary: true,
                verified: true,
            },
        ];

        let a = user().into_assertion(&emails);
        assert_eq!(a.email, "primary@x.com");
        assert!(a.email_verified);
        assert_eq!(a.provider_user_id, "42");
        assert_eq!(a.display_name, "octo");

        let public = user().into_assertion(&[]);
        assert_eq!(public.email, "public@x.com");
        assert!(!public.email_verified);

        // An unverified primary is skipped in favour of the profile email
        let unverified = [GithubEmail {
            email: "primary@x.com".to_string(),
            primary: true,
            verified: false,
        }];
        let a = user().into_assertion(&unverified);
        assert_eq!(a.email, "public@x.com");
        assert!(!a.email_verified);

        let hidden = GithubUser {
            email: None,
            ..user()
        };
        let noreply = hidden.into_assertion(&[]);
        assert_eq!(noreply.email, "octo@users.noreply.github.com");
        assert!(noreply.email_verified);
    }

    #[test]
    fn test_google_profile_mapping() {
        let info: GoogleUserInfo = serde_json::from_str(
            r#"{"sub":"1234","email":"g@x.com","email_verified":true,"name":"G User","picture":"https://p/x.png"}"#,
        )
        .unwrap();

        let a = info.into_assertion();
        assert_eq!(a.provider, Provider::Google);
        assert_eq!(a.provider_user_id, "1234");
        assert_eq!(a.email, "g@x.com");
        assert!(a.email_verified);
        assert_eq!(a.avatar_url.as_deref(), Some("https://p/x.png"));
    }

    #[test]
    fn test_google_email_verification_is_carried() {
        let unverified: GoogleUserInfo = serde_json::from_str(
            r#"{"sub":"attacker-sub","email":"victim@x.com","email_verified":false}"#,
        )
        .unwrap();
        assert!(!unverified.into_assertion().email_verified);

        let missing: GoogleUserInfo =
            serde_json::from_str(r#"{"sub":"1","email":"a@x.com"}"#).unwrap();
        assert!(!missing.into_assertion().email_verified);
    }

    #[test]
    fn test_endpoint_override() {
        let public_url = Url::parse("http://localhost:5000").unwrap();
        let config = OAuthClientConfig {
            endpoints: Some(ProviderEndpoints {
                auth_url: "http://127.0.0.1:9/authorize".to_string(),
                token_url: "http://127.0.0.1:9/token".to_string(),
                profile_url: "http://127.0.0.1:9/user".to_string(),
                emails_url: None,
            }),
            ..config()
        };
        let client = OAuthClient::new(Provider::Github, &config, &public_url).unwrap();

        assert!(
            client
                .authorization_url()
                .url
                .starts_with("http://127.0.0.1:9/authorize?")
        );
        assert_eq!(client.profile_url, "http://127.0.0.1:9/user");
        assert!(client.emails_url.is_none());
    }
}

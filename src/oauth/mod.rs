//! External identity providers: OAuth flow and account linking.

mod client;
mod linker;

pub use client::{
    AuthorizationStart, OAuthClient, OAuthClientConfig, OAuthError, OAuthProviders,
    ProviderEndpoints,
};
pub use linker::{ExternalAssertion, LinkError, LinkOutcome, generate_username, resolve};

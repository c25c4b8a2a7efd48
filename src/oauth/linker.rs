//! Reconcile an external identity assertion with local accounts.
//!
//! Precedence: an existing link wins, then an account with the same email
//! gains the link, and only then is a new passwordless account created.
//! Only an email the provider has verified may attach to an existing account.

use rand::Rng;
use tracing::{debug, info};

use crate::db::{Database, NewUser, Provider, UniqueField, User, unique_violation};

/// Attempts before giving up when concurrent logins keep colliding.
const MAX_ATTEMPTS: usize = 3;

/// Characters kept from the email local part when deriving a username.
const USERNAME_BASE_MAX: usize = 13;
const USERNAME_SUFFIX_LEN: usize = 6;
const USERNAME_SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A statement from a provider about who the user is.
#[derive(Debug, Clone)]
pub struct ExternalAssertion {
    pub provider: Provider,
    pub provider_user_id: String,
    pub email: String,
    /// The provider vouches that the user controls `email`.
    pub email_verified: bool,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug)]
pub enum LinkOutcome {
    /// The identity was already linked.
    Existing(User),
    /// The identity was attached to an account with the same email.
    Linked(User),
    /// A new account was created for the identity.
    Created(User),
}

impl LinkOutcome {
    pub fn user(&self) -> &User {
        match self {
            LinkOutcome::Existing(u) | LinkOutcome::Linked(u) | LinkOutcome::Created(u) => u,
        }
    }

    pub fn into_user(self) -> User {
        match self {
            LinkOutcome::Existing(u) | LinkOutcome::Linked(u) | LinkOutcome::Created(u) => u,
        }
    }
}

#[derive(Debug)]
pub enum LinkError {
    /// The provider did not supply an email address.
    MissingEmail,
    /// An account uses this email, but the provider has not verified it.
    UnverifiedEmail,
    /// The account with this email already holds a different identity from this provider.
    ProviderAlreadyLinked,
    /// Concurrent writes kept winning the race.
    Contention,
    Database(sqlx::Error),
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::MissingEmail => write!(f, "Provider did not supply an email"),
            LinkError::UnverifiedEmail => {
                write!(f, "Provider email is unverified and belongs to an existing account")
            }
            LinkError::ProviderAlreadyLinked => {
                write!(f, "Account already linked to another identity from this provider")
            }
            LinkError::Contention => write!(f, "Gave up linking after repeated conflicts"),
            LinkError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for LinkError {}

enum Attempt {
    Done(LinkOutcome),
    /// Lost a unique-constraint race; start over from the lookup.
    Retry,
}

/// Resolve an assertion to a local user, linking or creating as needed.
///
/// Idempotent: repeated calls with the same provider identity return the same user.
pub async fn resolve(db: &Database, assertion: &ExternalAssertion) -> Result<LinkOutcome, LinkError> {
    if assertion.email.trim().is_empty() {
        return Err(LinkError::MissingEmail);
    }

    for attempt in 1..=MAX_ATTEMPTS {
        match try_resolve(db, assertion).await? {
            Attempt::Done(outcome) => return Ok(outcome),
            Attempt::Retry => {
                debug!(
                    provider = assertion.provider.as_str(),
                    attempt, "Identity link lost a race, retrying"
                );
            }
        }
    }

    Err(LinkError::Contention)
}

async fn try_resolve(db: &Database, assertion: &ExternalAssertion) -> Result<Attempt, LinkError> {
    let provider = assertion.provider;
    let provider_user_id = assertion.provider_user_id.as_str();

    if let Some(user) = db
        .identities()
        .find_user(provider, provider_user_id)
        .await
        .map_err(LinkError::Database)?
    {
        return Ok(Attempt::Done(LinkOutcome::Existing(user)));
    }

    if let Some(user) = db
        .users()
        .get_by_email(&assertion.email)
        .await
        .map_err(LinkError::Database)?
    {
        if !assertion.email_verified {
            return Err(LinkError::UnverifiedEmail);
        }
        return link_existing(db, user, assertion).await;
    }

    create_linked(db, assertion).await
}

async fn link_existing(
    db: &Database,
    user: User,
    assertion: &ExternalAssertion,
) -> Result<Attempt, LinkError> {
    let provider = assertion.provider;

    let providers = db
        .identities()
        .providers_for(user.id)
        .await
        .map_err(LinkError::Database)?;
    if providers.contains(&provider) {
        return Err(LinkError::ProviderAlreadyLinked);
    }

    if let Err(e) = db
        .identities()
        .link(user.id, provider, &assertion.provider_user_id)
        .await
    {
        return match unique_violation(&e) {
            Some(UniqueField::ExternalIdentity | UniqueField::ProviderSlot) => Ok(Attempt::Retry),
            _ => Err(LinkError::Database(e)),
        };
    }

    if let Some(avatar) = assertion.avatar_url.as_deref().filter(|a| !a.is_empty()) {
        db.users()
            .set_avatar_if_empty(user.id, avatar)
            .await
            .map_err(LinkError::Database)?;
    }

    info!(
        user = %user.username,
        provider = provider.as_str(),
        "Linked external identity to existing account"
    );

    let user = db
        .users()
        .get_by_id(user.id)
        .await
        .map_err(LinkError::Database)?
        .unwrap_or(user);
    Ok(Attempt::Done(LinkOutcome::Linked(user)))
}

async fn create_linked(db: &Database, assertion: &ExternalAssertion) -> Result<Attempt, LinkError> {
    let uuid = uuid::Uuid::new_v4().to_string();
    let username = generate_username(&assertion.email);
    let name = match assertion.display_name.trim() {
        "" => username.as_str(),
        display_name => display_name,
    };

    let new_user = NewUser {
        uuid: &uuid,
        username: &username,
        email: &assertion.email,
        name,
        password_hash: None,
        avatar: assertion.avatar_url.as_deref().unwrap_or(""),
    };

    let id = match db
        .users()
        .create_linked(&new_user, assertion.provider, &assertion.provider_user_id)
        .await
    {
        Ok(id) => id,
        Err(e) if unique_violation(&e).is_some() => return Ok(Attempt::Retry),
        Err(e) => return Err(LinkError::Database(e)),
    };

    info!(
        user = %username,
        provider = assertion.provider.as_str(),
        "Created account from external identity"
    );

    match db.users().get_by_id(id).await.map_err(LinkError::Database)? {
        Some(user) => Ok(Attempt::Done(LinkOutcome::Created(user))),
        // Deleted between insert and read; treat like any other lost race
        None => Ok(Attempt::Retry),
    }
}

/// Derive a username from an email: the sanitized local part (at most 13
/// characters) plus `_` and 6 random lowercase alphanumerics.
pub fn generate_username(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let mut base: String = local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(USERNAME_BASE_MAX)
        .collect();
    if base.is_empty() {
        base.push_str("user");
    }

    let mut rng = rand::rng();
    let suffix: String = (0..USERNAME_SUFFIX_LEN)
        .map(|_| {
            let idx = rng.random_range(0..USERNAME_SUFFIX_CHARSET.len());
            USERNAME_SUFFIX_CHARSET[idx] as char
        })
        .collect();

    format!("{}_{}", base, suffix)
}

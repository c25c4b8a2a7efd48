//! Bearer-token authentication with role and ownership guards.
//!
//! Access tokens are verified on every request and resolved against the user
//! store, so role changes, bans and deletions take effect immediately. Logged
//! out tokens are rejected through the revocation denylist.

mod bearer;
mod errors;
mod extractors;
pub mod guards;
mod ip;
mod state;
mod types;

pub use bearer::bearer_token;
pub use errors::{ApiAuthError, AuthErrorKind};
pub(crate) use extractors::resolve_subject;
pub use extractors::{AdminOnly, AnyRole, Auth, OptionalAuth, RoleConstraint};
pub use guards::{is_admin, is_self_or_admin, require_admin, require_self_or_admin};
pub use ip::{HasHeadersAndExtensions, extract_client_ip};
pub use state::HasAuthBackend;
pub use types::AuthenticatedUser;

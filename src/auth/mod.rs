// Authentication module
// Manages the access token lifecycle: cached reuse and fresh logins

mod types;
mod login;
mod manager;

pub use manager::Authenticator;
pub use types::{CachedToken, CredentialSet, TOKEN_LIFETIME_SECS};

//! Persistence for OAuth clients, authorization codes and refresh tokens.
//!
//! [`Storage`] is the contract every backend satisfies; [`MemoryStorage`] keeps
//! everything in process memory, [`SqlStorage`] persists to a relational database.
//! Both are exercised by the same conformance suite.

pub mod memory;
pub mod sql;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::StorageResult;
use crate::pkce::PkceMethod;

pub use memory::MemoryStorage;
pub use sql::SqlStorage;

/// Free-form claims carried from the upstream IdP.
pub type UserClaims = serde_json::Map<String, serde_json::Value>;

/// A registered OAuth client.
#[derive(Clone, Serialize, Deserialize)]
pub struct Client {
    /// Internal record id.
    pub id: String,
    pub client_id: String,
    /// Bcrypt hash of the client secret. The plaintext is never stored.
    pub client_secret: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub require_pkce: bool,
    pub created_at: DateTime<Utc>,
    /// Cleared on deletion; inactive clients are kept for audit.
    pub active: bool,
}

impl Client {
    /// Check if a redirect URI is acceptable for this client.
    ///
    /// Loopback URIs match on scheme and host only (RFC 8252 §7.3); everything
    /// else needs an exact string match.
    #[must_use]
    pub fn valid_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|registered| matches_redirect_uri(registered, uri))
    }

    /// Check if the client was registered for a grant type.
    #[must_use]
    pub fn supports_grant_type(&self, grant_type: &str) -> bool {
        self.grant_types.iter().any(|g| g == grant_type)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.client_id)
            .field("name", &self.name)
            .field("redirect_uris", &self.redirect_uris)
            .field("grant_types", &self.grant_types)
            .field("require_pkce", &self.require_pkce)
            .field("active", &self.active)
            .finish()
    }
}

/// A single-use code binding an authenticated user to a client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub id: String,
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub user_claims: UserClaims,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<PkceMethod>,
    pub redirect_uri: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl AuthorizationCode {
    /// Check if the code has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// A long-lived credential for renewing access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: String,
    pub token: String,
    pub client_id: String,
    pub user_id: String,
    pub user_claims: UserClaims,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Check if the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Persistence contract for the authorization server.
///
/// Lookups of missing keys fail with [`StorageError::NotFound`](crate::error::StorageError::NotFound).
/// Implementations must be safe for concurrent use; the single-use operations
/// (`mark_authorization_code_used`, `delete_refresh_token`) must let exactly one
/// concurrent caller win.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store a new client. Fails if the `client_id` is taken.
    async fn create_client(&self, client: &Client) -> StorageResult<()>;

    /// Look up a client, active or not.
    async fn get_client(&self, client_id: &str) -> StorageResult<Client>;

    /// Replace an existing client. Fails if it does not exist.
    async fn update_client(&self, client: &Client) -> StorageResult<()>;

    /// Deactivate a client. Idempotent.
    async fn delete_client(&self, client_id: &str) -> StorageResult<()>;

    /// List active clients.
    async fn list_clients(&self) -> StorageResult<Vec<Client>>;

    async fn save_authorization_code(&self, code: &AuthorizationCode) -> StorageResult<()>;

    async fn get_authorization_code(&self, code: &str) -> StorageResult<AuthorizationCode>;

    /// Atomically flip `used` from false to true.
    ///
    /// Returns `false` if the code was already used.
    async fn mark_authorization_code_used(&self, code: &str) -> StorageResult<bool>;

    async fn delete_authorization_code(&self, code: &str) -> StorageResult<()>;

    /// Remove codes whose expiry has passed. Returns the number removed.
    async fn cleanup_expired_codes(&self) -> StorageResult<u64>;

    async fn save_refresh_token(&self, token: &RefreshToken) -> StorageResult<()>;

    async fn get_refresh_token(&self, token: &str) -> StorageResult<RefreshToken>;

    /// Remove a refresh token. Returns `false` if it was already gone.
    async fn delete_refresh_token(&self, token: &str) -> StorageResult<bool>;

    /// Remove every refresh token issued to a client. Returns the number removed.
    async fn delete_refresh_tokens_for_client(&self, client_id: &str) -> StorageResult<u64>;

    /// Remove tokens whose expiry has passed. Returns the number removed.
    async fn cleanup_expired_tokens(&self) -> StorageResult<u64>;
}

/// Check if a URI is a loopback redirect URI: `http` with host `127.0.0.1`, `::1` or `localhost`.
#[must_use]
pub fn is_loopback_uri(uri: &str) -> bool {
    Url::parse(uri).is_ok_and(|url| is_loopback_url(&url))
}

fn is_loopback_url(url: &Url) -> bool {
    if url.scheme() != "http" {
        return false;
    }
    match url.host() {
        Some(url::Host::Domain(host)) => host == "localhost",
        Some(url::Host::Ipv4(addr)) => addr == std::net::Ipv4Addr::LOCALHOST,
        Some(url::Host::Ipv6(addr)) => addr == std::net::Ipv6Addr::LOCALHOST,
        None => false,
    }
}

/// Check if a requested redirect URI matches a registered one.
///
/// Exact string equality, except when both are loopback URIs: then only scheme and
/// host must agree, since native clients bind an ephemeral port.
#[must_use]
pub fn matches_redirect_uri(registered: &str, requested: &str) -> bool {
    if registered == requested {
        return true;
    }
    let (Ok(registered), Ok(requested)) = (Url::parse(registered), Url::parse(requested)) else {
        return false;
    };
    if !is_loopback_url(&registered) || !is_loopback_url(&requested) {
        return false;
    }
    registered.scheme() == requested.scheme() && registered.host() == requested.host()
}

//! OAuth 2.1 authorization server.
//!
//! ## Supported Standards
//! - RFC 6749: Authorization Code and Refresh Token grants
//! - RFC 7636: PKCE (`S256` and `plain`)
//! - RFC 7591: Dynamic Client Registration
//! - RFC 8414: Authorization Server Metadata
//! - RFC 8252 §7.3: loopback redirect URIs with ephemeral ports
//!
//! User authentication is delegated to an upstream OIDC provider, see [`broker`].

pub mod broker;
pub mod cleanup;
pub mod handlers;
pub mod transport;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::dcr::{DcrRequest, DcrResponse, DcrService};
use crate::error::{OAuthError, OAuthResult, StorageError};
use crate::pkce::{self, PkceMethod};
use crate::state::{MemoryStateStore, StateStore};
use crate::storage::{self, AuthorizationCode, Client, RefreshToken, Storage, UserClaims};
use crate::tokens::{self, AccessTokenRequest, TOKEN_BYTES};
use crate::upstream::UpstreamClient;

pub use broker::{CallbackOutcome, CallbackParams};
pub use cleanup::{CleanupHandle, SweepStats};

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// Parameters of an authorization request (`GET /authorize`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationRequest {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    /// Opaque client state, echoed back on the final redirect when non-empty.
    pub state: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Parameters of a token request (`POST /token`). Empty strings mean "absent".
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: String,
    pub redirect_uri: String,
    pub client_id: String,
    pub client_secret: String,
    pub code_verifier: String,
    pub refresh_token: String,
    pub scope: String,
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRequest")
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Successful token response.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// RFC 8414 metadata document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_owned()).collect()
}

fn to_delta(name: &str, value: std::time::Duration) -> OAuthResult<TimeDelta> {
    TimeDelta::from_std(value).map_err(|_| OAuthError::internal(format!("{name} is out of range")))
}

/// `now + ttl`, failing instead of overflowing the timestamp range.
fn expiry(now: DateTime<Utc>, ttl: TimeDelta) -> OAuthResult<DateTime<Utc>> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| OAuthError::internal("configured lifetime exceeds the timestamp range"))
}

/// Lifetimes converted once for timestamp arithmetic.
#[derive(Debug, Clone, Copy)]
struct Lifetimes {
    access_token: TimeDelta,
    refresh_token: TimeDelta,
    auth_code: TimeDelta,
}

/// The authorization server. Share it behind an `Arc`.
pub struct AuthorizationServer {
    config: ServerConfig,
    lifetimes: Lifetimes,
    storage: Arc<dyn Storage>,
    dcr: Option<DcrService>,
    states: Arc<dyn StateStore>,
    upstream: Option<UpstreamClient>,
}

impl AuthorizationServer {
    /// Create a server over a storage backend, with an in-memory state store.
    pub fn new(config: ServerConfig, storage: Arc<dyn Storage>) -> OAuthResult<Self> {
        let config = config.normalized();

        let lifetimes = Lifetimes {
            access_token: to_delta("access_token_ttl", config.access_token_ttl)?,
            refresh_token: to_delta("refresh_token_ttl", config.refresh_token_ttl)?,
            auth_code: to_delta("auth_code_ttl", config.auth_code_ttl)?,
        };

        let dcr = if config.dcr.enabled {
            Some(DcrService::new(Arc::clone(&storage), config.dcr.clone())?)
        } else {
            None
        };

        let upstream = config.upstream.clone().map(UpstreamClient::new).transpose()?;

        Ok(Self {
            config,
            lifetimes,
            storage,
            dcr,
            states: Arc::new(MemoryStateStore::new()),
            upstream,
        })
    }

    /// Replace the authorization-state store.
    #[must_use]
    pub fn with_state_store(mut self, states: Arc<dyn StateStore>) -> Self {
        self.states = states;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// HMAC key for validating issued JWTs, if configured.
    #[must_use]
    pub fn signing_key(&self) -> Option<&[u8]> {
        self.config.signing_key.as_deref().filter(|k| !k.is_empty())
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    #[must_use]
    pub fn state_store(&self) -> &Arc<dyn StateStore> {
        &self.states
    }

    // ─── Authorization ───────────────────────────────────────────────────────

    async fn load_client(&self, client_id: &str) -> OAuthResult<Client> {
        match self.storage.get_client(client_id).await {
            Ok(client) => Ok(client),
            Err(e) if e.is_not_found() => Err(OAuthError::InvalidClient),
            Err(e) => Err(e.into()),
        }
    }

    async fn validate_authorization_request(
        &self,
        req: &AuthorizationRequest,
    ) -> OAuthResult<Client> {
        let client = self.load_client(&req.client_id).await?;
        if !client.active {
            return Err(OAuthError::InactiveClient);
        }
        if !client.valid_redirect_uri(&req.redirect_uri) {
            return Err(OAuthError::InvalidRedirectUri);
        }
        if req.response_type != "code" {
            return Err(OAuthError::UnsupportedResponseType);
        }
        Ok(client)
    }

    /// Check the PKCE parameters and resolve the challenge method.
    ///
    /// Clients with `require_pkce` must name `S256` or `plain` explicitly; others may
    /// omit the method, which then defaults to `S256`.
    fn validate_pkce(
        client: &Client,
        req: &AuthorizationRequest,
    ) -> OAuthResult<Option<(String, PkceMethod)>> {
        let challenge = req.code_challenge.as_deref().filter(|c| !c.is_empty());
        let method = req.code_challenge_method.as_deref().filter(|m| !m.is_empty());

        if client.require_pkce {
            if challenge.is_none() {
                return Err(OAuthError::MissingCodeChallenge);
            }
            if method.is_none() {
                return Err(OAuthError::InvalidChallengeMethod);
            }
        }

        let Some(challenge) = challenge else {
            return Ok(None);
        };
        let method = method.map(str::parse::<PkceMethod>).transpose()?.unwrap_or_default();
        if method == PkceMethod::S256 {
            pkce::validate_code_challenge(challenge)?;
        }
        Ok(Some((challenge.to_owned(), method)))
    }

    /// Issue an authorization code for an already-authenticated user.
    ///
    /// On any validation failure no code is stored.
    pub async fn authorize(
        &self,
        req: &AuthorizationRequest,
        user_id: &str,
        user_claims: UserClaims,
    ) -> OAuthResult<String> {
        let client = self.validate_authorization_request(req).await?;
        let pkce = Self::validate_pkce(&client, req)?;

        let value = tokens::generate_secure_token(TOKEN_BYTES)?;
        let now = Utc::now();
        let (code_challenge, code_challenge_method) = pkce.unzip();
        let code = AuthorizationCode {
            id: uuid::Uuid::new_v4().to_string(),
            code: value.clone(),
            client_id: client.client_id.clone(),
            user_id: user_id.to_owned(),
            user_claims,
            code_challenge,
            code_challenge_method,
            redirect_uri: req.redirect_uri.clone(),
            scope: req.scope.clone(),
            expires_at: expiry(now, self.lifetimes.auth_code)?,
            used: false,
            created_at: now,
        };
        self.storage.save_authorization_code(&code).await?;

        info!(client_id = %client.client_id, user_id, "Issued authorization code");
        Ok(value)
    }

    // ─── Token ───────────────────────────────────────────────────────────────

    /// Exchange a code or refresh token for a new token pair.
    pub async fn token(&self, req: &TokenRequest) -> OAuthResult<TokenResponse> {
        match req.grant_type.as_str() {
            GRANT_AUTHORIZATION_CODE => self.exchange_authorization_code(req).await,
            GRANT_REFRESH_TOKEN => self.exchange_refresh_token(req).await,
            _ => Err(OAuthError::UnsupportedGrantType),
        }
    }

    async fn authenticate_client(&self, req: &TokenRequest, grant_type: &str) -> OAuthResult<Client> {
        let client = self.load_client(&req.client_id).await?;
        if !tokens::verify_secret(req.client_secret.clone(), client.client_secret.clone()).await {
            return Err(OAuthError::InvalidCredentials);
        }
        if !client.active {
            return Err(OAuthError::InactiveClient);
        }
        // Administratively provisioned clients may have no grant list at all.
        if !client.grant_types.is_empty() && !client.supports_grant_type(grant_type) {
            return Err(OAuthError::UnauthorizedGrantType);
        }
        Ok(client)
    }

    async fn exchange_authorization_code(&self, req: &TokenRequest) -> OAuthResult<TokenResponse> {
        let code = match self.storage.get_authorization_code(&req.code).await {
            Ok(code) => code,
            Err(e) if e.is_not_found() => return Err(OAuthError::InvalidCode),
            Err(e) => return Err(e.into()),
        };

        if code.used {
            return Err(OAuthError::CodeAlreadyUsed);
        }
        if code.is_expired() {
            return Err(OAuthError::CodeExpired);
        }
        if code.client_id != req.client_id {
            return Err(OAuthError::ClientMismatch);
        }
        if !storage::matches_redirect_uri(&code.redirect_uri, &req.redirect_uri) {
            return Err(OAuthError::RedirectUriMismatch);
        }

        let client = self.authenticate_client(req, GRANT_AUTHORIZATION_CODE).await?;

        if let Some(challenge) = code.code_challenge.as_deref() {
            if req.code_verifier.is_empty() {
                return Err(OAuthError::MissingCodeVerifier);
            }
            let method = code.code_challenge_method.unwrap_or_default();
            if !pkce::verify_code_challenge(&req.code_verifier, challenge, method).unwrap_or(false) {
                return Err(OAuthError::InvalidCodeVerifier);
            }
        }

        // Losing a concurrent exchange surfaces as "already used".
        match self.storage.mark_authorization_code_used(&code.code).await {
            Ok(true) => {}
            Ok(false) => return Err(OAuthError::CodeAlreadyUsed),
            Err(StorageError::NotFound { .. }) => return Err(OAuthError::InvalidCode),
            Err(e) => return Err(e.into()),
        }

        self.issue_tokens(&client, &code.user_id, &code.user_claims, &code.scope).await
    }

    async fn exchange_refresh_token(&self, req: &TokenRequest) -> OAuthResult<TokenResponse> {
        let token = match self.storage.get_refresh_token(&req.refresh_token).await {
            Ok(token) => token,
            Err(e) if e.is_not_found() => return Err(OAuthError::InvalidRefreshToken),
            Err(e) => return Err(e.into()),
        };

        if token.is_expired() {
            if let Err(e) = self.storage.delete_refresh_token(&token.token).await {
                warn!(client_id = %token.client_id, error = %e, "Failed to delete expired refresh token");
            }
            return Err(OAuthError::RefreshTokenExpired);
        }
        if token.client_id != req.client_id {
            return Err(OAuthError::ClientMismatch);
        }

        let client = self.authenticate_client(req, GRANT_REFRESH_TOKEN).await?;

        match self.storage.delete_refresh_token(&token.token).await {
            Ok(true) => {}
            Ok(false) => return Err(OAuthError::InvalidRefreshToken),
            Err(e) => {
                warn!(client_id = %client.client_id, error = %e, "Failed to delete rotated refresh token");
            }
        }

        let scope = if req.scope.is_empty() { token.scope.as_str() } else { req.scope.as_str() };
        self.issue_tokens(&client, &token.user_id, &token.user_claims, scope).await
    }

    async fn issue_tokens(
        &self,
        client: &Client,
        user_id: &str,
        user_claims: &UserClaims,
        scope: &str,
    ) -> OAuthResult<TokenResponse> {
        let now = Utc::now();
        let access_token = tokens::issue_access_token(
            &AccessTokenRequest {
                issuer: &self.config.issuer,
                client_id: &client.client_id,
                user_id,
                scope,
                claims: user_claims,
                issued_at: now,
                expires_at: expiry(now, self.lifetimes.access_token)?,
            },
            self.signing_key(),
        )?;

        let refresh_token = RefreshToken {
            id: uuid::Uuid::new_v4().to_string(),
            token: tokens::generate_secure_token(TOKEN_BYTES)?,
            client_id: client.client_id.clone(),
            user_id: user_id.to_owned(),
            user_claims: user_claims.clone(),
            scope: scope.to_owned(),
            expires_at: expiry(now, self.lifetimes.refresh_token)?,
            created_at: now,
        };
        self.storage.save_refresh_token(&refresh_token).await?;

        info!(client_id = %client.client_id, user_id, "Issued token pair");

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_owned(),
            expires_in: self.config.access_token_ttl.as_secs(),
            refresh_token: refresh_token.token,
            scope: scope.to_owned(),
        })
    }

    // ─── Clients ─────────────────────────────────────────────────────────────

    /// Register a client through DCR.
    pub async fn register_client(&self, req: DcrRequest) -> OAuthResult<DcrResponse> {
        let Some(dcr) = self.dcr.as_ref() else {
            return Err(OAuthError::RegistrationDisabled);
        };
        dcr.register(req).await
    }

    /// Deactivate a client and revoke all of its refresh tokens.
    ///
    /// Returns the number of refresh tokens removed.
    pub async fn revoke_client(&self, client_id: &str) -> OAuthResult<u64> {
        self.load_client(client_id).await?;
        self.storage.delete_client(client_id).await?;
        let revoked = self.storage.delete_refresh_tokens_for_client(client_id).await?;
        info!(client_id, revoked, "Revoked OAuth client");
        Ok(revoked)
    }

    // ─── Metadata ────────────────────────────────────────────────────────────

    #[must_use]
    pub fn metadata(&self) -> AuthorizationServerMetadata {
        let issuer = self.config.issuer.trim_end_matches('/');
        AuthorizationServerMetadata {
            issuer: self.config.issuer.clone(),
            authorization_endpoint: format!("{issuer}/authorize"),
            token_endpoint: format!("{issuer}/token"),
            registration_endpoint: format!("{issuer}/register"),
            response_types_supported: strings(&["code"]),
            grant_types_supported: strings(&[GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN]),
            code_challenge_methods_supported: strings(&["S256", "plain"]),
            token_endpoint_auth_methods_supported: strings(&[
                "client_secret_basic",
                "client_secret_post",
            ]),
        }
    }
}

impl fmt::Debug for AuthorizationServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationServer")
            .field("config", &self.config)
            .field("dcr_enabled", &self.dcr.is_some())
            .field("upstream", &self.upstream.is_some())
            .finish()
    }
}

/// Build a client authorization URL with a fresh S256 challenge.
///
/// Returns the URL and the verifier the client must later present.
#[must_use]
pub fn build_authorization_url(
    base_url: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
    state: &str,
) -> (String, String) {
    let verifier = pkce::generate_code_verifier();
    let challenge = pkce::generate_code_challenge(&verifier, PkceMethod::S256).unwrap_or_default();
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", scope)
        .append_pair("state", state)
        .append_pair("code_challenge", &challenge)
        .append_pair("code_challenge_method", PkceMethod::S256.as_str())
        .finish();
    (format!("{}/authorize?{query}", base_url.trim_end_matches('/')), verifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    async fn server_with_client(require_pkce: bool) -> AuthorizationServer {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .create_client(&Client {
                id: "1".into(),
                client_id: "c1".into(),
                client_secret: bcrypt::hash("s", 4).unwrap(),
                name: "test".into(),
                redirect_uris: vec!["http://localhost/cb".into()],
                grant_types: vec![],
                require_pkce,
                created_at: Utc::now(),
                active: true,
            })
            .await
            .unwrap();
        AuthorizationServer::new(ServerConfig::new("https://auth.example.com"), storage).unwrap()
    }

    fn request() -> AuthorizationRequest {
        AuthorizationRequest {
            response_type: "code".into(),
            client_id: "c1".into(),
            redirect_uri: "http://localhost/cb".into(),
            ..AuthorizationRequest::default()
        }
    }

    #[tokio::test]
    async fn test_pkce_method_defaults_to_s256() {
        let server = server_with_client(false).await;
        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier, PkceMethod::S256).unwrap();
        let req = AuthorizationRequest { code_challenge: Some(challenge), ..request() };

        let code = server.authorize(&req, "u1", UserClaims::new()).await.unwrap();
        let stored = server.storage().get_authorization_code(&code).await.unwrap();
        assert_eq!(stored.code_challenge_method, Some(PkceMethod::S256));
    }

    #[tokio::test]
    async fn test_required_pkce_needs_explicit_method() {
        let server = server_with_client(true).await;
        let req = AuthorizationRequest {
            code_challenge: Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".into()),
            ..request()
        };
        let err = server.authorize(&req, "u1", UserClaims::new()).await.unwrap_err();
        assert!(matches!(err, OAuthError::InvalidChallengeMethod));
    }

    #[tokio::test]
    async fn test_malformed_s256_challenge_rejected() {
        let server = server_with_client(false).await;
        let req = AuthorizationRequest {
            code_challenge: Some("too-short".into()),
            code_challenge_method: Some("S256".into()),
            ..request()
        };
        let err = server.authorize(&req, "u1", UserClaims::new()).await.unwrap_err();
        assert!(matches!(err, OAuthError::InvalidCodeChallenge(_)));
    }

    #[test]
    fn test_build_authorization_url() {
        let (url, verifier) =
            build_authorization_url("https://auth.example.com/", "c1", "http://localhost/cb", "openid", "xyz");
        let challenge = pkce::generate_code_challenge(&verifier, PkceMethod::S256).unwrap();
        assert!(url.starts_with("https://auth.example.com/authorize?response_type=code&client_id=c1"));
        assert!(url.contains(&format!("code_challenge={challenge}")));
        assert!(url.ends_with("code_challenge_method=S256"));
    }

    #[tokio::test]
    async fn test_metadata_document() {
        let server = server_with_client(false).await;
        let metadata = server.metadata();
        assert_eq!(metadata.issuer, "https://auth.example.com");
        assert_eq!(metadata.token_endpoint, "https://auth.example.com/token");
        assert_eq!(metadata.code_challenge_methods_supported, vec!["S256", "plain"]);
    }

    #[test]
    fn test_accessors_for_token_validation() {
        let storage = Arc::new(MemoryStorage::new());
        let config = ServerConfig::new("https://auth.example.com").with_signing_key(b"k".to_vec());
        let server = AuthorizationServer::new(config, storage.clone()).unwrap();
        assert_eq!(server.issuer(), "https://auth.example.com");
        assert_eq!(server.signing_key(), Some(&b"k"[..]));

        let config = ServerConfig::new("https://auth.example.com").with_signing_key(Vec::new());
        let server = AuthorizationServer::new(config, storage).unwrap();
        assert!(server.signing_key().is_none());
    }
}

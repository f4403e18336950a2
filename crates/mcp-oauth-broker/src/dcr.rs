//! Dynamic Client Registration (RFC 7591).

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{OAuthError, OAuthResult};
use crate::storage::{Client, Storage};
use crate::tokens;

/// Grant types given to clients that do not ask for any.
pub const DEFAULT_GRANT_TYPES: &[&str] = &["authorization_code", "refresh_token"];

const CLIENT_ID_BYTES: usize = 32;
const CLIENT_SECRET_BYTES: usize = 48;

/// Registration policy.
#[derive(Clone)]
pub struct DcrConfig {
    pub enabled: bool,
    /// Regular expressions a redirect URI must match. Empty allows any URI.
    pub allowed_redirect_patterns: Vec<String>,
    pub default_grant_types: Vec<String>,
    /// Force PKCE on every registered client.
    pub require_pkce: bool,
    /// Bcrypt cost for client secrets.
    pub secret_hash_cost: u32,
}

impl Default for DcrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_redirect_patterns: Vec::new(),
            default_grant_types: DEFAULT_GRANT_TYPES.iter().map(|g| (*g).to_owned()).collect(),
            require_pkce: false,
            secret_hash_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl fmt::Debug for DcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DcrConfig")
            .field("enabled", &self.enabled)
            .field("allowed_redirect_patterns", &self.allowed_redirect_patterns)
            .field("default_grant_types", &self.default_grant_types)
            .field("require_pkce", &self.require_pkce)
            .finish()
    }
}

/// Registration request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DcrRequest {
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grant_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,
}

/// Registration response. `client_secret` is the only time the plaintext leaves the server.
#[derive(Clone, Serialize, Deserialize)]
pub struct DcrResponse {
    pub client_id: String,
    pub client_secret: String,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub client_id_issued_at: i64,
    /// Always 0: secrets do not expire.
    pub client_secret_expires_at: i64,
}

impl fmt::Debug for DcrResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DcrResponse")
            .field("client_id", &self.client_id)
            .field("client_name", &self.client_name)
            .field("redirect_uris", &self.redirect_uris)
            .field("grant_types", &self.grant_types)
            .finish()
    }
}

/// Registers clients against a [`Storage`] backend.
#[derive(Clone)]
pub struct DcrService {
    storage: Arc<dyn Storage>,
    config: DcrConfig,
    patterns: Vec<Regex>,
}

impl DcrService {
    /// Create the service, compiling the redirect patterns.
    pub fn new(storage: Arc<dyn Storage>, mut config: DcrConfig) -> OAuthResult<Self> {
        let patterns = config
            .allowed_redirect_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| OAuthError::InvalidRedirectPattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<OAuthResult<Vec<_>>>()?;

        if config.default_grant_types.is_empty() {
            config.default_grant_types =
                DEFAULT_GRANT_TYPES.iter().map(|g| (*g).to_owned()).collect();
        }

        Ok(Self { storage, config, patterns })
    }

    /// Check a redirect URI against the allow-list.
    #[must_use]
    pub fn is_allowed_redirect_uri(&self, uri: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.is_match(uri))
    }

    /// Register a new client and return its plaintext secret.
    pub async fn register(&self, request: DcrRequest) -> OAuthResult<DcrResponse> {
        if !self.config.enabled {
            return Err(OAuthError::RegistrationDisabled);
        }
        if request.redirect_uris.is_empty() {
            return Err(OAuthError::MissingRedirectUris);
        }
        if let Some(uri) = request.redirect_uris.iter().find(|u| !self.is_allowed_redirect_uri(u)) {
            return Err(OAuthError::RedirectUriNotAllowed(uri.clone()));
        }

        let client_id = tokens::generate_secure_token(CLIENT_ID_BYTES)?;
        let client_secret = tokens::generate_secure_token(CLIENT_SECRET_BYTES)?;
        let hashed = tokens::hash_secret(client_secret.clone(), self.config.secret_hash_cost).await?;

        let grant_types = if request.grant_types.is_empty() {
            self.config.default_grant_types.clone()
        } else {
            request.grant_types
        };

        let now = Utc::now();
        let client = Client {
            id: uuid::Uuid::new_v4().to_string(),
            client_id: client_id.clone(),
            client_secret: hashed,
            name: request.client_name.clone(),
            redirect_uris: request.redirect_uris.clone(),
            grant_types: grant_types.clone(),
            require_pkce: self.config.require_pkce,
            created_at: now,
            active: true,
        };
        self.storage.create_client(&client).await?;

        info!(client_id = %client_id, name = %client.name, "Registered OAuth client");

        Ok(DcrResponse {
            client_id,
            client_secret,
            client_name: request.client_name,
            redirect_uris: request.redirect_uris,
            grant_types,
            token_endpoint_auth_method: request
                .token_endpoint_auth_method
                .unwrap_or_else(|| "client_secret_basic".to_owned()),
            client_id_issued_at: now.timestamp(),
            client_secret_expires_at: 0,
        })
    }
}

//! Configuration for the OAuth broker.

use std::fmt;
use std::time::Duration;

use crate::dcr::DcrConfig;

/// Default lifetimes and intervals.
pub mod defaults {
    use std::time::Duration;

    /// Access token lifetime (1 hour).
    pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(3600);

    /// Refresh token lifetime (30 days).
    pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

    /// Authorization code lifetime (10 minutes).
    pub const AUTH_CODE_TTL: Duration = Duration::from_secs(600);

    /// Maximum age of an abandoned upstream flow (10 minutes).
    pub const STATE_TTL: Duration = Duration::from_secs(600);

    /// Interval between expiry sweeps (5 minutes).
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

    /// Upstream token exchange timeout.
    pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

    /// Scopes requested from the upstream IdP.
    pub const UPSTREAM_SCOPES: &str = "openid email profile";
}

/// Authorization server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Public base URL of this server, used as `iss` and in the metadata document.
    pub issuer: String,

    pub access_token_ttl: Duration,

    pub refresh_token_ttl: Duration,

    pub auth_code_ttl: Duration,

    /// Age after which an unconsumed [`AuthorizationState`](crate::state::AuthorizationState) is reaped.
    pub state_ttl: Duration,

    pub cleanup_interval: Duration,

    /// HMAC key for JWT access tokens. `None` (or empty) issues opaque tokens.
    pub signing_key: Option<Vec<u8>>,

    pub dcr: DcrConfig,

    /// Upstream IdP. Required for the HTTP authorization flow.
    pub upstream: Option<UpstreamConfig>,
}

impl ServerConfig {
    /// Create a configuration with default lifetimes.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            access_token_ttl: defaults::ACCESS_TOKEN_TTL,
            refresh_token_ttl: defaults::REFRESH_TOKEN_TTL,
            auth_code_ttl: defaults::AUTH_CODE_TTL,
            state_ttl: defaults::STATE_TTL,
            cleanup_interval: defaults::CLEANUP_INTERVAL,
            signing_key: None,
            dcr: DcrConfig::default(),
            upstream: None,
        }
    }

    /// Create a test configuration with DCR enabled and a fast bcrypt cost.
    #[must_use]
    pub fn for_testing(issuer: &str) -> Self {
        Self {
            dcr: DcrConfig { enabled: true, secret_hash_cost: 4, ..DcrConfig::default() },
            ..Self::new(issuer)
        }
    }

    /// Set the JWT signing key.
    #[must_use]
    pub fn with_signing_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.signing_key = Some(key.into());
        self
    }

    /// Set the upstream IdP.
    #[must_use]
    pub fn with_upstream(mut self, upstream: UpstreamConfig) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Replace zero durations with defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        fn or_default(value: Duration, default: Duration) -> Duration {
            if value.is_zero() { default } else { value }
        }
        self.access_token_ttl = or_default(self.access_token_ttl, defaults::ACCESS_TOKEN_TTL);
        self.refresh_token_ttl = or_default(self.refresh_token_ttl, defaults::REFRESH_TOKEN_TTL);
        self.auth_code_ttl = or_default(self.auth_code_ttl, defaults::AUTH_CODE_TTL);
        self.state_ttl = or_default(self.state_ttl, defaults::STATE_TTL);
        self.cleanup_interval = or_default(self.cleanup_interval, defaults::CLEANUP_INTERVAL);
        if let Some(upstream) = self.upstream.as_mut() {
            upstream.timeout = or_default(upstream.timeout, defaults::UPSTREAM_TIMEOUT);
        }
        self
    }

    /// Check if JWT access tokens are enabled.
    #[must_use]
    pub fn has_signing_key(&self) -> bool {
        self.signing_key.as_ref().is_some_and(|k| !k.is_empty())
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("issuer", &self.issuer)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("auth_code_ttl", &self.auth_code_ttl)
            .field("state_ttl", &self.state_ttl)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("signing_key", &self.has_signing_key().then_some("[REDACTED]"))
            .field("dcr", &self.dcr)
            .field("upstream", &self.upstream)
            .finish()
    }
}

/// Upstream OIDC provider (e.g. a Keycloak realm).
#[derive(Clone)]
pub struct UpstreamConfig {
    /// Realm base URL, e.g. `https://sso.example.com/realms/acme`.
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    /// This server's callback URL as registered with the IdP.
    pub redirect_uri: String,
    pub scopes: String,
    pub timeout: Duration,
}

impl UpstreamConfig {
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: defaults::UPSTREAM_SCOPES.to_owned(),
            timeout: defaults::UPSTREAM_TIMEOUT,
        }
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("timeout", &self.timeout)
            .finish()
    }
}

//! Error types for the OAuth broker.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.
//! Display strings of [`OAuthError`] client variants are the `error_description` values
//! returned on the wire, so they stay short and stable.

use std::time::Duration;

/// Errors from the persistence layer.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// Requested record does not exist.
    #[error("{entity} not found")]
    NotFound {
        /// Kind of record that was looked up.
        entity: &'static str,
    },

    /// A client with the same `client_id` is already registered.
    #[error("client already exists: {0}")]
    ClientExists(String),

    /// Relational backend failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON column could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be turned back into a model.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Any other backend failure.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Create a not-found error for the given entity.
    #[must_use]
    pub const fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Returns true if the record simply does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors from the ephemeral authorization-state store.
#[derive(thiserror::Error, Debug)]
pub enum StateError {
    /// No state is stored under the key.
    #[error("authorization state not found")]
    NotFound,

    /// Backend failure.
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// Errors from PKCE validation (RFC 7636).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PkceError {
    #[error("code verifier must be between 43 and 128 characters")]
    VerifierLength,

    #[error("code verifier contains invalid characters")]
    VerifierCharacters,

    #[error("code challenge must be between 43 and 128 characters")]
    ChallengeLength,

    #[error("code challenge contains invalid characters")]
    ChallengeCharacters,

    #[error("unsupported PKCE method: {0}")]
    UnsupportedMethod(String),
}

/// Errors from talking to the upstream identity provider.
#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    /// HTTP transport error (connection, DNS, TLS, etc.)
    #[error("sending token request: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered the code exchange with a non-success status.
    #[error("token exchange failed ({status}): {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Upstream response body was not a token response.
    #[error("decoding token response: {0}")]
    Decode(String),

    /// The upstream redirect carried an OAuth error, forwarded verbatim.
    #[error("{error}: {description}")]
    Rejected {
        /// Upstream error code (e.g. `access_denied`).
        error: String,
        /// Upstream error description, possibly empty.
        description: String,
    },

    /// Code exchange did not finish in time.
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),
}

impl UpstreamError {
    /// Create a rejection error from callback parameters.
    #[must_use]
    pub fn rejected(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Rejected { error: error.into(), description: description.into() }
    }
}

/// Errors surfaced by the authorization server flows.
#[derive(thiserror::Error, Debug)]
pub enum OAuthError {
    #[error("invalid client_id")]
    InvalidClient,

    #[error("client is not active")]
    InactiveClient,

    #[error("invalid redirect_uri")]
    InvalidRedirectUri,

    #[error("unsupported response_type")]
    UnsupportedResponseType,

    #[error("unsupported grant_type")]
    UnsupportedGrantType,

    #[error("grant_type not allowed for this client")]
    UnauthorizedGrantType,

    #[error("code_challenge required")]
    MissingCodeChallenge,

    #[error("invalid code_challenge")]
    InvalidCodeChallenge(#[source] PkceError),

    #[error("invalid code_challenge_method")]
    InvalidChallengeMethod,

    #[error("code_verifier required")]
    MissingCodeVerifier,

    #[error("invalid code_verifier")]
    InvalidCodeVerifier,

    #[error("invalid authorization code")]
    InvalidCode,

    #[error("authorization code already used")]
    CodeAlreadyUsed,

    #[error("authorization code expired")]
    CodeExpired,

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("refresh token expired")]
    RefreshTokenExpired,

    #[error("client_id mismatch")]
    ClientMismatch,

    #[error("redirect_uri mismatch")]
    RedirectUriMismatch,

    #[error("invalid client credentials")]
    InvalidCredentials,

    #[error("dynamic client registration is disabled")]
    RegistrationDisabled,

    #[error("at least one redirect_uri is required")]
    MissingRedirectUris,

    #[error("redirect URI not allowed: {0}")]
    RedirectUriNotAllowed(String),

    #[error("invalid redirect pattern {pattern:?}: {source}")]
    InvalidRedirectPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Malformed request that does not fit a more specific variant.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("upstream IdP not configured")]
    UpstreamNotConfigured,

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OAuthError {
    /// Create an invalid-request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the caller is at fault (400-class), false for server faults.
    ///
    /// A missing authorization state counts as a client error: the flow was replayed,
    /// abandoned or forged.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        match self {
            Self::Upstream(UpstreamError::Rejected { .. }) => true,
            Self::State(StateError::NotFound) => true,
            Self::Upstream(_)
            | Self::State(_)
            | Self::Storage(_)
            | Self::Internal(_)
            | Self::UpstreamNotConfigured
            | Self::InvalidRedirectPattern { .. } => false,
            _ => true,
        }
    }

    /// OAuth `error` code for the JSON error body.
    ///
    /// Upstream rejections keep the code the IdP sent.
    #[must_use]
    pub fn error_code(&self) -> &str {
        match self {
            Self::Upstream(UpstreamError::Rejected { error, .. }) => error,
            _ if self.is_client_error() => "invalid_request",
            _ => "server_error",
        }
    }

    /// Human-readable `error_description` for the JSON error body.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Upstream(UpstreamError::Rejected { description, .. }) => description.clone(),
            _ => self.to_string(),
        }
    }
}

impl From<PkceError> for OAuthError {
    fn from(err: PkceError) -> Self {
        match err {
            PkceError::UnsupportedMethod(_) => Self::InvalidChallengeMethod,
            PkceError::VerifierLength | PkceError::VerifierCharacters => Self::InvalidCodeVerifier,
            other => Self::InvalidCodeChallenge(other),
        }
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for authorization server operations.
pub type OAuthResult<T> = Result<T, OAuthError>;

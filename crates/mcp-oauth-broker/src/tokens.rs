//! Token and secret primitives: random identifiers, HS256 access tokens, bcrypt.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{OAuthError, OAuthResult};
use crate::storage::UserClaims;

/// Bytes of entropy in authorization codes, refresh tokens and opaque access tokens.
pub const TOKEN_BYTES: usize = 32;

/// Generate `len` random bytes from the OS RNG, base64url-encoded without padding.
pub fn generate_secure_token(len: usize) -> OAuthResult<String> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| OAuthError::internal(format!("generating random token: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Claims of a JWT access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    /// Client the token was issued to.
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub scope: String,
    /// Upstream user claims.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub claims: UserClaims,
}

/// Inputs for one access token.
#[derive(Debug, Clone, Copy)]
pub struct AccessTokenRequest<'a> {
    pub issuer: &'a str,
    pub client_id: &'a str,
    pub user_id: &'a str,
    pub scope: &'a str,
    pub claims: &'a UserClaims,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issue an access token: an HS256 JWT when `signing_key` is non-empty, otherwise an
/// opaque random string.
///
/// Opaque tokens carry no verifiable claims and are not meant for production.
pub fn issue_access_token(
    request: &AccessTokenRequest<'_>,
    signing_key: Option<&[u8]>,
) -> OAuthResult<String> {
    let Some(key) = signing_key.filter(|k| !k.is_empty()) else {
        return generate_secure_token(TOKEN_BYTES);
    };

    let claims = AccessTokenClaims {
        iss: request.issuer.to_owned(),
        sub: request.user_id.to_owned(),
        aud: request.client_id.to_owned(),
        exp: request.expires_at.timestamp(),
        iat: request.issued_at.timestamp(),
        nbf: request.issued_at.timestamp(),
        scope: request.scope.to_owned(),
        claims: request.claims.clone(),
    };

    jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(key))
        .map_err(|e| OAuthError::internal(format!("signing access token: {e}")))
}

/// Hash a client secret with bcrypt on the blocking pool.
pub async fn hash_secret(secret: String, cost: u32) -> OAuthResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(secret, cost))
        .await
        .map_err(|e| OAuthError::internal(format!("hashing task failed: {e}")))?
        .map_err(|e| OAuthError::internal(format!("hashing client secret: {e}")))
}

/// Compare a presented secret to a stored bcrypt hash on the blocking pool.
///
/// A malformed hash counts as a mismatch.
pub async fn verify_secret(secret: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || bcrypt::verify(secret, &hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

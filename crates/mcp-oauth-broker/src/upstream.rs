//! Client for the upstream OIDC provider.
//!
//! The broker is a confidential client of the upstream IdP: it sends the user agent to
//! `/protocol/openid-connect/auth` and exchanges the returned code at
//! `/protocol/openid-connect/token`. Token payloads are decoded without signature
//! verification because they arrive directly from the IdP over the back channel.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::form_urlencoded;

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::storage::UserClaims;

/// Claims that always come from the upstream access token, which is where Keycloak
/// puts role information.
const ROLE_CLAIMS: &[&str] = &["realm_access", "resource_access"];

/// User id used when neither token carries a `sub` claim.
pub const UNKNOWN_USER: &str = "unknown";

/// Token response from the upstream IdP.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamTokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// HTTP client bound to one upstream realm.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    /// Build the client. Every request is bounded by `config.timeout`.
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/protocol/openid-connect/{path}", self.config.issuer.trim_end_matches('/'))
    }

    /// Authorization URL for a flow correlated by `state`.
    ///
    /// With `prompt_none` the IdP must not show any UI (OIDC Core §3.1.2.1) and answers
    /// `login_required` when there is no session.
    #[must_use]
    pub fn authorization_url(&self, state: &str, prompt_none: bool) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", state)
            .append_pair("scope", &self.config.scopes);
        if prompt_none {
            query.append_pair("prompt", "none");
        }
        format!("{}?{}", self.endpoint("auth"), query.finish())
    }

    /// Exchange an upstream authorization code for upstream tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<UpstreamTokenResponse, UpstreamError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .client
            .post(self.endpoint("token"))
            .form(&form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "Upstream token exchange rejected");
            return Err(UpstreamError::Status { status: status.as_u16(), body });
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    fn transport_error(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() { UpstreamError::Timeout(self.config.timeout) } else { err.into() }
    }
}

/// Decode the payload segment of a compact JWT without verifying it.
///
/// Returns `None` unless the token has exactly three segments and the middle one is
/// base64url-encoded JSON object.
#[must_use]
pub fn decode_jwt_claims(token: &str) -> Option<UserClaims> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Derive the user id and merged claim set from an upstream token response.
///
/// ID-token claims come first. From the access token, role claims always override and
/// every other claim only fills gaps.
#[must_use]
pub fn extract_user(tokens: &UpstreamTokenResponse) -> (String, UserClaims) {
    let mut claims =
        tokens.id_token.as_deref().and_then(decode_jwt_claims).unwrap_or_default();

    if let Some(access) = decode_jwt_claims(&tokens.access_token) {
        for (key, value) in access {
            if ROLE_CLAIMS.contains(&key.as_str()) {
                claims.insert(key, value);
            } else {
                claims.entry(key).or_insert(value);
            }
        }
    }

    let user_id = claims
        .get("sub")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(UNKNOWN_USER)
        .to_owned();
    (user_id, claims)
}

//! Brokering the user login through the upstream IdP.
//!
//! 1. `GET /authorize` validates the client request, stores an [`AuthorizationState`]
//!    under a fresh upstream state value and sends the user agent upstream with
//!    `prompt=none` (silent SSO).
//! 2. The IdP calls back with either a code or an error. A `login_required` error is
//!    retried once, interactively, under the same state key.
//! 3. On success the upstream code is exchanged, the user is derived from the upstream
//!    tokens, and the client is redirected with a freshly issued authorization code.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::{AuthorizationRequest, AuthorizationServer};
use crate::error::{OAuthError, OAuthResult, StateError, UpstreamError};
use crate::state::AuthorizationState;
use crate::tokens;
use crate::upstream::{self, UpstreamClient};

/// Bytes of entropy in the upstream correlation state.
const UPSTREAM_STATE_BYTES: usize = 16;

/// Error the IdP returns for `prompt=none` without an active session (OIDC Core §3.1.2.6).
const LOGIN_REQUIRED: &str = "login_required";

/// Query parameters of the upstream callback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
    pub error: String,
    pub error_description: String,
}

/// Where to send the user agent after a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Back to the client's redirect URI, carrying the new code.
    RedirectToClient(String),
    /// Back to the IdP for an interactive login.
    RetryUpstream(String),
}

impl CallbackOutcome {
    #[must_use]
    pub fn location(&self) -> &str {
        match self {
            Self::RedirectToClient(url) | Self::RetryUpstream(url) => url,
        }
    }
}

impl AuthorizationServer {
    fn upstream(&self) -> OAuthResult<&UpstreamClient> {
        self.upstream.as_ref().ok_or(OAuthError::UpstreamNotConfigured)
    }

    /// Validate a client authorization request and return the upstream URL to redirect to.
    pub async fn begin_upstream_authorization(
        &self,
        req: &AuthorizationRequest,
    ) -> OAuthResult<String> {
        let client = self.validate_authorization_request(req).await?;
        let pkce = Self::validate_pkce(&client, req)?;
        let upstream = self.upstream()?;

        let upstream_state = tokens::generate_secure_token(UPSTREAM_STATE_BYTES)?;
        let (code_challenge, code_challenge_method) = pkce.unzip();
        let state = AuthorizationState {
            client_id: req.client_id.clone(),
            redirect_uri: req.redirect_uri.clone(),
            state: req.state.clone(),
            code_challenge,
            code_challenge_method,
            scope: req.scope.clone(),
            upstream_state: upstream_state.clone(),
            prompt_none_attempted: false,
            created_at: Utc::now(),
        };
        self.states.save(&upstream_state, state).await?;

        debug!(client_id = %req.client_id, "Redirecting to upstream IdP for silent SSO");
        Ok(upstream.authorization_url(&upstream_state, true))
    }

    /// Handle the upstream IdP callback.
    pub async fn handle_callback(&self, params: CallbackParams) -> OAuthResult<CallbackOutcome> {
        if !params.error.is_empty() {
            if params.error == LOGIN_REQUIRED {
                if let Some(url) = self.retry_interactive(&params.state).await? {
                    return Ok(CallbackOutcome::RetryUpstream(url));
                }
            }
            return Err(UpstreamError::rejected(params.error, params.error_description).into());
        }

        if params.code.is_empty() || params.state.is_empty() {
            return Err(OAuthError::invalid_request("missing code or state"));
        }

        let auth_state = self.states.get(&params.state).await?;
        if !self.states.delete(&params.state).await? {
            // A concurrent callback consumed it first.
            return Err(StateError::NotFound.into());
        }

        let upstream_tokens = self.upstream()?.exchange_code(&params.code).await?;
        let (user_id, user_claims) = upstream::extract_user(&upstream_tokens);

        let request = AuthorizationRequest {
            response_type: "code".to_owned(),
            client_id: auth_state.client_id,
            redirect_uri: auth_state.redirect_uri,
            scope: auth_state.scope,
            state: auth_state.state,
            code_challenge: auth_state.code_challenge,
            code_challenge_method: auth_state.code_challenge_method.map(|m| m.as_str().to_owned()),
        };
        let code = self.authorize(&request, &user_id, user_claims).await?;

        info!(client_id = %request.client_id, user_id = %user_id, "Upstream login completed");
        Ok(CallbackOutcome::RedirectToClient(build_client_redirect_url(
            &request.redirect_uri,
            &code,
            &request.state,
        )))
    }

    /// Re-send a silent flow to the IdP without `prompt=none`, at most once per flow.
    ///
    /// Returns `None` when the state is unknown or was already retried.
    async fn retry_interactive(&self, key: &str) -> OAuthResult<Option<String>> {
        if key.is_empty() {
            return Ok(None);
        }
        let upstream = self.upstream()?;
        let Some(state) = self.states.mark_prompt_none_attempted(key).await? else {
            return Ok(None);
        };

        debug!(client_id = %state.client_id, "No upstream session, retrying with interactive login");
        Ok(Some(upstream.authorization_url(key, false)))
    }
}

/// Append `code` (and `state`, if non-empty) to the client redirect URI, keeping any
/// query parameters it already has.
#[must_use]
pub fn build_client_redirect_url(redirect_uri: &str, code: &str, state: &str) -> String {
    let Ok(mut url) = Url::parse(redirect_uri) else {
        return redirect_uri.to_owned();
    };

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "code" && (state.is_empty() || key != "state"))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.extend_pairs(retained);
        query.append_pair("code", code);
        if !state.is_empty() {
            query.append_pair("state", state);
        }
    }
    url.into()
}

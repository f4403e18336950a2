//! HTTP endpoint handlers.
//!
//! Errors use the RFC 6749 JSON shape `{"error", "error_description"}`.

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{
        Query, State,
        rejection::{FormRejection, JsonRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Basic},
    typed_header::TypedHeaderRejection,
};
use serde::{Deserialize, Serialize};

use super::{AuthorizationRequest, AuthorizationServer, CallbackParams, TokenRequest, TokenResponse};
use crate::dcr::DcrRequest;
use crate::error::OAuthError;

/// OAuth error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_description: String,
}

fn oauth_error(status: StatusCode, error: &str, description: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody { error: error.to_owned(), error_description: description.into() }),
    )
        .into_response()
}

/// Map a flow error: client faults to 400, everything else to 500.
fn error_response(err: &OAuthError) -> Response {
    if err.is_client_error() {
        tracing::debug!(error = %err, "Rejected OAuth request");
        oauth_error(StatusCode::BAD_REQUEST, err.error_code(), err.description())
    } else {
        tracing::error!(error = %err, "OAuth request failed");
        oauth_error(StatusCode::INTERNAL_SERVER_ERROR, err.error_code(), err.description())
    }
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_owned())]).into_response()
}

pub async fn get_required() -> Response {
    oauth_error(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "GET required")
}

pub async fn post_required() -> Response {
    oauth_error(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "POST required")
}

/// `GET /.well-known/oauth-authorization-server`
pub async fn handle_metadata(State(server): State<Arc<AuthorizationServer>>) -> impl IntoResponse {
    Json(server.metadata())
}

/// `GET /authorize`
///
/// Validates the client request and sends the user agent to the upstream IdP.
pub async fn handle_authorize(
    State(server): State<Arc<AuthorizationServer>>,
    query: Result<Query<AuthorizationRequest>, QueryRejection>,
) -> Response {
    let Ok(Query(req)) = query else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "could not parse query");
    };

    match server.begin_upstream_authorization(&req).await {
        Ok(location) => found(&location),
        Err(err) => error_response(&err),
    }
}

/// `GET /callback`
///
/// Completes the upstream login and redirects back to the client, or retries upstream.
pub async fn handle_callback(
    State(server): State<Arc<AuthorizationServer>>,
    query: Result<Query<CallbackParams>, QueryRejection>,
) -> Response {
    let Ok(Query(params)) = query else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "could not parse query");
    };

    match server.handle_callback(params).await {
        Ok(outcome) => found(outcome.location()),
        Err(err) => error_response(&err),
    }
}

/// `POST /token`
///
/// Client credentials come from the form or, when the form lacks them, HTTP Basic.
pub async fn handle_token(
    State(server): State<Arc<AuthorizationServer>>,
    basic: Result<TypedHeader<Authorization<Basic>>, TypedHeaderRejection>,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let Ok(Form(mut req)) = form else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "could not parse form");
    };

    if req.client_id.is_empty() || req.client_secret.is_empty() {
        if let Ok(TypedHeader(Authorization(credentials))) = basic {
            req.client_id = credentials.username().to_owned();
            req.client_secret = credentials.password().to_owned();
        }
    }

    match server.token(&req).await {
        Ok(tokens) => token_success(&tokens),
        Err(err) => error_response(&err),
    }
}

/// Token response with the RFC 6749 §5.1 cache headers.
fn token_success(tokens: &TokenResponse) -> Response {
    let mut response = Json(tokens).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// `POST /register`
///
/// Every registration failure is reported as `400 invalid_request`.
pub async fn handle_register(
    State(server): State<Arc<AuthorizationServer>>,
    body: Result<Json<DcrRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "could not parse JSON");
    };

    match server.register_client(req).await {
        Ok(registered) => (StatusCode::CREATED, Json(registered)).into_response(),
        Err(err) => {
            if !err.is_client_error() {
                tracing::error!(error = %err, "Client registration failed");
            }
            oauth_error(StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
        }
    }
}

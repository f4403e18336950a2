//! HTTP transport: router and server loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{MethodRouter, get, post},
};
use tower_http::trace::TraceLayer;

use super::AuthorizationServer;
use super::handlers::{
    get_required, handle_authorize, handle_callback, handle_metadata, handle_register,
    handle_token, post_required,
};

type Route = MethodRouter<Arc<AuthorizationServer>>;

/// Build the router. Each endpoint is mounted at `/x` and at the `/oauth/x` alias.
pub fn create_router(server: Arc<AuthorizationServer>) -> Router {
    let authorize: Route = get(handle_authorize).fallback(get_required);
    let callback: Route = get(handle_callback).fallback(get_required);
    let token: Route = post(handle_token).fallback(post_required);
    let register: Route = post(handle_register).fallback(post_required);

    Router::new()
        .route(
            "/.well-known/oauth-authorization-server",
            get(handle_metadata).fallback(get_required),
        )
        .route("/authorize", authorize.clone())
        .route("/oauth/authorize", authorize)
        .route("/callback", callback.clone())
        .route("/oauth/callback", callback)
        .route("/token", token.clone())
        .route("/oauth/token", token)
        .route("/register", register.clone())
        .route("/oauth/register", register)
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// Serve on `0.0.0.0:port` until Ctrl+C.
pub async fn run_http(server: Arc<AuthorizationServer>, port: u16) -> anyhow::Result<()> {
    let router = create_router(server);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("OAuth server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("HTTP server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}

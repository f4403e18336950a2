//! MCP OAuth Broker
//!
//! An OAuth 2.1 authorization server for MCP clients that delegates user login to an
//! upstream OIDC provider such as Keycloak. It issues its own authorization codes,
//! access tokens and refresh tokens to downstream clients.
//!
//! # Features
//!
//! - **Authorization Code + PKCE**: `S256` and `plain`, loopback redirect URIs on any port
//! - **Silent SSO**: `prompt=none` first, one interactive retry on `login_required`
//! - **Token rotation**: every refresh invalidates the presented refresh token
//! - **Dynamic Client Registration**: bcrypt-hashed secrets, regex redirect allow-list
//! - **Pluggable storage**: in-memory or SQLite behind one async trait
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mcp_oauth_broker::{AuthorizationServer, MemoryStorage, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::new("https://auth.example.com").with_signing_key("change-me");
//!     let server = Arc::new(AuthorizationServer::new(config, Arc::new(MemoryStorage::new()))?);
//!
//!     let cleanup = server.start_cleanup();
//!     mcp_oauth_broker::server::transport::run_http(Arc::clone(&server), 8080).await?;
//!     cleanup.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dcr;
pub mod error;
pub mod pkce;
pub mod server;
pub mod state;
pub mod storage;
pub mod tokens;
pub mod upstream;

pub use config::{ServerConfig, UpstreamConfig};
pub use dcr::{DcrConfig, DcrRequest, DcrResponse, DcrService};
pub use error::{OAuthError, OAuthResult, StorageError};
pub use server::{AuthorizationRequest, AuthorizationServer, TokenRequest, TokenResponse};
pub use state::{AuthorizationState, MemoryStateStore, StateStore};
pub use storage::{MemoryStorage, SqlStorage, Storage};

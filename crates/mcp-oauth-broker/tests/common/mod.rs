//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use mcp_oauth_broker::error::{StorageError, StorageResult};
use mcp_oauth_broker::storage::{AuthorizationCode, Client, RefreshToken};
use mcp_oauth_broker::{
    AuthorizationRequest, AuthorizationServer, MemoryStorage, ServerConfig, Storage, TokenRequest,
};

pub const ISSUER: &str = "https://auth.example.com";
pub const CLIENT_ID: &str = "c1";
pub const CLIENT_SECRET: &str = "s";
pub const REDIRECT_URI: &str = "http://localhost/cb";

/// Store a client with a cheap bcrypt hash of `secret`.
pub async fn seed_client(
    storage: &dyn Storage,
    client_id: &str,
    secret: &str,
    redirect_uris: &[&str],
    require_pkce: bool,
) -> Client {
    let client = Client {
        id: uuid::Uuid::new_v4().to_string(),
        client_id: client_id.to_owned(),
        client_secret: bcrypt::hash(secret, 4).unwrap(),
        name: format!("{client_id} test client"),
        redirect_uris: redirect_uris.iter().map(|u| (*u).to_owned()).collect(),
        grant_types: vec!["authorization_code".into(), "refresh_token".into()],
        require_pkce,
        created_at: Utc::now(),
        active: true,
    };
    storage.create_client(&client).await.unwrap();
    client
}

/// Server over in-memory storage with client `c1` (secret `s`, redirect `http://localhost/cb`).
pub async fn server_with_client(config: ServerConfig) -> (Arc<AuthorizationServer>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    seed_client(storage.as_ref(), CLIENT_ID, CLIENT_SECRET, &[REDIRECT_URI], false).await;
    let server = AuthorizationServer::new(config, storage.clone()).unwrap();
    (Arc::new(server), storage)
}

pub fn auth_request(client_id: &str, redirect_uri: &str) -> AuthorizationRequest {
    AuthorizationRequest {
        response_type: "code".into(),
        client_id: client_id.into(),
        redirect_uri: redirect_uri.into(),
        scope: "openid profile".into(),
        state: "xyz".into(),
        ..AuthorizationRequest::default()
    }
}

pub fn code_grant(code: &str, client_id: &str, secret: &str, redirect_uri: &str) -> TokenRequest {
    TokenRequest {
        grant_type: "authorization_code".into(),
        code: code.into(),
        redirect_uri: redirect_uri.into(),
        client_id: client_id.into(),
        client_secret: secret.into(),
        ..TokenRequest::default()
    }
}

pub fn refresh_grant(refresh_token: &str, client_id: &str, secret: &str) -> TokenRequest {
    TokenRequest {
        grant_type: "refresh_token".into(),
        refresh_token: refresh_token.into(),
        client_id: client_id.into(),
        client_secret: secret.into(),
        ..TokenRequest::default()
    }
}

/// Storage double that delegates to [`MemoryStorage`] but fails selected operations.
#[derive(Clone, Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    failing: Arc<Mutex<HashSet<&'static str>>>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future call of `operation` fail.
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn heal(&self, operation: &'static str) {
        self.failing.lock().unwrap().remove(operation);
    }

    fn check(&self, operation: &'static str) -> StorageResult<()> {
        if self.failing.lock().unwrap().contains(operation) {
            return Err(StorageError::unavailable(format!("{operation} failed (injected)")));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn create_client(&self, client: &Client) -> StorageResult<()> {
        self.check("create_client")?;
        self.inner.create_client(client).await
    }

    async fn get_client(&self, client_id: &str) -> StorageResult<Client> {
        self.check("get_client")?;
        self.inner.get_client(client_id).await
    }

    async fn update_client(&self, client: &Client) -> StorageResult<()> {
        self.check("update_client")?;
        self.inner.update_client(client).await
    }

    async fn delete_client(&self, client_id: &str) -> StorageResult<()> {
        self.check("delete_client")?;
        self.inner.delete_client(client_id).await
    }

    async fn list_clients(&self) -> StorageResult<Vec<Client>> {
        self.check("list_clients")?;
        self.inner.list_clients().await
    }

    async fn save_authorization_code(&self, code: &AuthorizationCode) -> StorageResult<()> {
        self.check("save_authorization_code")?;
        self.inner.save_authorization_code(code).await
    }

    async fn get_authorization_code(&self, code: &str) -> StorageResult<AuthorizationCode> {
        self.check("get_authorization_code")?;
        self.inner.get_authorization_code(code).await
    }

    async fn mark_authorization_code_used(&self, code: &str) -> StorageResult<bool> {
        self.check("mark_authorization_code_used")?;
        self.inner.mark_authorization_code_used(code).await
    }

    async fn delete_authorization_code(&self, code: &str) -> StorageResult<()> {
        self.check("delete_authorization_code")?;
        self.inner.delete_authorization_code(code).await
    }

    async fn cleanup_expired_codes(&self) -> StorageResult<u64> {
        self.check("cleanup_expired_codes")?;
        self.inner.cleanup_expired_codes().await
    }

    async fn save_refresh_token(&self, token: &RefreshToken) -> StorageResult<()> {
        self.check("save_refresh_token")?;
        self.inner.save_refresh_token(token).await
    }

    async fn get_refresh_token(&self, token: &str) -> StorageResult<RefreshToken> {
        self.check("get_refresh_token")?;
        self.inner.get_refresh_token(token).await
    }

    async fn delete_refresh_token(&self, token: &str) -> StorageResult<bool> {
        self.check("delete_refresh_token")?;
        self.inner.delete_refresh_token(token).await
    }

    async fn delete_refresh_tokens_for_client(&self, client_id: &str) -> StorageResult<u64> {
        self.check("delete_refresh_tokens_for_client")?;
        self.inner.delete_refresh_tokens_for_client(client_id).await
    }

    async fn cleanup_expired_tokens(&self) -> StorageResult<u64> {
        self.check("cleanup_expired_tokens")?;
        self.inner.cleanup_expired_tokens().await
    }
}

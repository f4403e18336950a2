//! In-memory storage backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{AuthorizationCode, Client, RefreshToken, Storage};
use crate::error::{StorageError, StorageResult};

/// In-memory store. Cheap to clone; clones share the same maps.
///
/// Records are stored as copies, so callers mutating a returned value never
/// affect what is stored.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    clients: Arc<RwLock<HashMap<String, Client>>>,
    codes: Arc<RwLock<HashMap<String, AuthorizationCode>>>,
    refresh_tokens: Arc<RwLock<HashMap<String, RefreshToken>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_client(&self, client: &Client) -> StorageResult<()> {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&client.client_id) {
            return Err(StorageError::ClientExists(client.client_id.clone()));
        }
        clients.insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> StorageResult<Client> {
        self.clients
            .read()
            .await
            .get(client_id)
            .cloned()
            .ok_or(StorageError::not_found("client"))
    }

    async fn update_client(&self, client: &Client) -> StorageResult<()> {
        let mut clients = self.clients.write().await;
        let existing =
            clients.get_mut(&client.client_id).ok_or(StorageError::not_found("client"))?;
        *existing = client.clone();
        Ok(())
    }

    async fn delete_client(&self, client_id: &str) -> StorageResult<()> {
        if let Some(client) = self.clients.write().await.get_mut(client_id) {
            client.active = false;
        }
        Ok(())
    }

    async fn list_clients(&self) -> StorageResult<Vec<Client>> {
        let clients = self.clients.read().await;
        let mut active: Vec<Client> = clients.values().filter(|c| c.active).cloned().collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    async fn save_authorization_code(&self, code: &AuthorizationCode) -> StorageResult<()> {
        self.codes.write().await.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn get_authorization_code(&self, code: &str) -> StorageResult<AuthorizationCode> {
        self.codes
            .read()
            .await
            .get(code)
            .cloned()
            .ok_or(StorageError::not_found("authorization code"))
    }

    async fn mark_authorization_code_used(&self, code: &str) -> StorageResult<bool> {
        let mut codes = self.codes.write().await;
        let stored = codes.get_mut(code).ok_or(StorageError::not_found("authorization code"))?;
        if stored.used {
            return Ok(false);
        }
        stored.used = true;
        Ok(true)
    }

    async fn delete_authorization_code(&self, code: &str) -> StorageResult<()> {
        self.codes.write().await.remove(code);
        Ok(())
    }

    async fn cleanup_expired_codes(&self) -> StorageResult<u64> {
        let now = Utc::now();
        let mut codes = self.codes.write().await;
        let before = codes.len();
        codes.retain(|_, c| c.expires_at >= now);
        Ok((before - codes.len()) as u64)
    }

    async fn save_refresh_token(&self, token: &RefreshToken) -> StorageResult<()> {
        self.refresh_tokens.write().await.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> StorageResult<RefreshToken> {
        self.refresh_tokens
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or(StorageError::not_found("refresh token"))
    }

    async fn delete_refresh_token(&self, token: &str) -> StorageResult<bool> {
        Ok(self.refresh_tokens.write().await.remove(token).is_some())
    }

    async fn delete_refresh_tokens_for_client(&self, client_id: &str) -> StorageResult<u64> {
        let mut tokens = self.refresh_tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, t| t.client_id != client_id);
        Ok((before - tokens.len()) as u64)
    }

    async fn cleanup_expired_tokens(&self) -> StorageResult<u64> {
        let now = Utc::now();
        let mut tokens = self.refresh_tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, t| t.expires_at >= now);
        Ok((before - tokens.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::storage::UserClaims;

    fn code(value: &str, ttl: TimeDelta) -> AuthorizationCode {
        let now = Utc::now();
        AuthorizationCode {
            id: uuid::Uuid::new_v4().to_string(),
            code: value.into(),
            client_id: "c1".into(),
            user_id: "u1".into(),
            user_claims: UserClaims::new(),
            code_challenge: None,
            code_challenge_method: None,
            redirect_uri: "http://localhost/cb".into(),
            scope: String::new(),
            expires_at: now + ttl,
            used: false,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_returned_copies_are_isolated() {
        let store = MemoryStorage::new();
        store.save_authorization_code(&code("abc", TimeDelta::minutes(5))).await.unwrap();

        let mut fetched = store.get_authorization_code("abc").await.unwrap();
        fetched.used = true;
        fetched.user_id = "mallory".into();

        let again = store.get_authorization_code("abc").await.unwrap();
        assert!(!again.used);
        assert_eq!(again.user_id, "u1");
    }

    #[tokio::test]
    async fn test_mark_used_only_once() {
        let store = MemoryStorage::new();
        store.save_authorization_code(&code("abc", TimeDelta::minutes(5))).await.unwrap();

        assert!(store.mark_authorization_code_used("abc").await.unwrap());
        assert!(!store.mark_authorization_code_used("abc").await.unwrap());
        assert!(store.mark_authorization_code_used("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_expired() {
        let store = MemoryStorage::new();
        store.save_authorization_code(&code("old", TimeDelta::minutes(-1))).await.unwrap();
        store.save_authorization_code(&code("new", TimeDelta::minutes(5))).await.unwrap();

        assert_eq!(store.cleanup_expired_codes().await.unwrap(), 1);
        assert!(store.get_authorization_code("old").await.is_err());
        assert!(store.get_authorization_code("new").await.is_ok());
    }
}

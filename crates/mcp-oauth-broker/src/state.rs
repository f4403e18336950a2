//! Ephemeral state linking an upstream IdP callback to the original client request.
//!
//! Entries are written when the user agent is sent upstream, read and deleted on the
//! callback, and otherwise reaped by age. `get` does not enforce expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StateError;
use crate::pkce::PkceMethod;

/// Original client request parameters, keyed by the upstream state value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationState {
    pub client_id: String,
    pub redirect_uri: String,
    /// Client-supplied `state`, echoed back on the final redirect.
    pub state: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<PkceMethod>,
    pub scope: String,
    /// Correlation value sent to the upstream IdP; also the store key.
    pub upstream_state: String,
    /// Set once the silent (`prompt=none`) attempt has been retried interactively.
    pub prompt_none_attempted: bool,
    pub created_at: DateTime<Utc>,
}

/// Short-lived key/value store for [`AuthorizationState`].
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store a state, replacing any entry under the same key.
    async fn save(&self, key: &str, state: AuthorizationState) -> Result<(), StateError>;

    /// Fetch a state. Fails with [`StateError::NotFound`] if absent.
    async fn get(&self, key: &str) -> Result<AuthorizationState, StateError>;

    /// Remove a state. Returns `false` if nothing was stored under the key.
    async fn delete(&self, key: &str) -> Result<bool, StateError>;

    /// Set `prompt_none_attempted` if it is still unset, as one atomic step.
    ///
    /// Returns the updated state to the single caller that flipped the flag, and `None`
    /// when the key is unknown or the flag was already set.
    async fn mark_prompt_none_attempted(
        &self,
        key: &str,
    ) -> Result<Option<AuthorizationState>, StateError>;

    /// Remove states older than `max_age`. Returns the number removed.
    async fn cleanup(&self, max_age: Duration) -> Result<usize, StateError>;
}

/// In-memory [`StateStore`].
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    states: Arc<RwLock<HashMap<String, AuthorizationState>>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored states.
    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, key: &str, state: AuthorizationState) -> Result<(), StateError> {
        self.states.write().await.insert(key.to_owned(), state);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<AuthorizationState, StateError> {
        self.states.read().await.get(key).cloned().ok_or(StateError::NotFound)
    }

    async fn delete(&self, key: &str) -> Result<bool, StateError> {
        Ok(self.states.write().await.remove(key).is_some())
    }

    async fn mark_prompt_none_attempted(
        &self,
        key: &str,
    ) -> Result<Option<AuthorizationState>, StateError> {
        let mut states = self.states.write().await;
        match states.get_mut(key) {
            Some(state) if !state.prompt_none_attempted => {
                state.prompt_none_attempted = true;
                Ok(Some(state.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn cleanup(&self, max_age: Duration) -> Result<usize, StateError> {
        let max_age = chrono::TimeDelta::from_std(max_age)
            .map_err(|e| StateError::Unavailable(format!("invalid max age: {e}")))?;
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return Ok(0);
        };

        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|_, s| s.created_at >= cutoff);
        Ok(before - states.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn state(key: &str, age: TimeDelta) -> AuthorizationState {
        AuthorizationState {
            client_id: "c1".into(),
            redirect_uri: "http://localhost/cb".into(),
            state: "xyz".into(),
            code_challenge: None,
            code_challenge_method: None,
            scope: "openid".into(),
            upstream_state: key.into(),
            prompt_none_attempted: false,
            created_at: Utc::now() - age,
        }
    }

    #[tokio::test]
    async fn test_save_get_delete() {
        let store = MemoryStateStore::new();
        store.save("k1", state("k1", TimeDelta::zero())).await.unwrap();

        let fetched = store.get("k1").await.unwrap();
        assert_eq!(fetched.client_id, "c1");

        assert!(store.delete("k1").await.unwrap());
        assert!(!store.delete("k1").await.unwrap());
        assert!(matches!(store.get("k1").await, Err(StateError::NotFound)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_does_not_enforce_expiry() {
        let store = MemoryStateStore::new();
        store.save("old", state("old", TimeDelta::days(2))).await.unwrap();
        assert!(store.get("old").await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_by_age() {
        let store = MemoryStateStore::new();
        store.save("old", state("old", TimeDelta::minutes(20))).await.unwrap();
        store.save("new", state("new", TimeDelta::zero())).await.unwrap();

        let removed = store.cleanup(Duration::from_secs(600)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.get("new").await.is_ok());
    }

    #[tokio::test]
    async fn test_resave_same_key_replaces() {
        let store = MemoryStateStore::new();
        store.save("k", state("k", TimeDelta::zero())).await.unwrap();
        let mut updated = store.get("k").await.unwrap();
        updated.prompt_none_attempted = true;
        store.save("k", updated).await.unwrap();

        assert!(store.get("k").await.unwrap().prompt_none_attempted);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_mark_prompt_none_attempted_flips_once() {
        let store = MemoryStateStore::new();
        store.save("k", state("k", TimeDelta::zero())).await.unwrap();

        let marked = store.mark_prompt_none_attempted("k").await.unwrap().unwrap();
        assert!(marked.prompt_none_attempted);
        assert!(store.mark_prompt_none_attempted("k").await.unwrap().is_none());
        assert!(store.mark_prompt_none_attempted("missing").await.unwrap().is_none());
        assert!(store.get("k").await.unwrap().prompt_none_attempted);
    }

    #[tokio::test]
    async fn test_cleanup_with_unbounded_age_keeps_everything() {
        let store = MemoryStateStore::new();
        store.save("k", state("k", TimeDelta::days(365))).await.unwrap();

        let removed = store.cleanup(Duration::from_secs(1_000_000_000_000_000)).await.unwrap();
        assert_eq!(removed, 0);
        assert!(!store.is_empty().await);
    }
}

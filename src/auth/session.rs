//! Token-based sessions on top of the [`Cache`] port.
//!
//! Three record kinds live in the cache:
//!
//! - token digest -> user id
//! - user id -> user snapshot
//! - user id -> session index (digests of all live tokens of that user)
//!
//! Resolving a token is therefore two reads and never touches the
//! application's user store. The index exists so that all sessions of a user
//! can be revoked at once.
//!
//! The write sequences in [`TokenStore::issue_token`] and
//! [`TokenStore::revoke_all`] are not transactional. With
//! `serialize_session_updates` enabled both run under a per-user lock, which
//! orders them within one process. Several processes sharing one cache can
//! still interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;

use crate::cache::Cache;
use crate::config::GateConfig;
use crate::crypto::token;
use crate::error::{GateError, GateResult};
use crate::models::{User, UserId};

use super::Authenticator;

pub const CACHE_PREFIX_TOKEN: &str = "gatehouse:token:";
pub const CACHE_PREFIX_USER: &str = "gatehouse:user:";
pub const CACHE_PREFIX_SESSIONS: &str = "gatehouse:sessions:";

#[derive(Default)]
struct IdentityLocks {
    locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl IdentityLocks {
    async fn lock(&self, id: &UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Forget the lock of `id` once nobody holds or waits on it
    fn prune(&self, id: &UserId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Issues, resolves and revokes session tokens
pub struct TokenStore {
    cache: Arc<dyn Cache>,
    token_length: usize,
    expires_in_minutes: u64,
    read_ttl_minutes: Option<u64>,
    serialize_updates: bool,
    locks: IdentityLocks,
}

impl TokenStore {
    pub fn new(cache: Arc<dyn Cache>, config: &GateConfig) -> Self {
        Self {
            cache,
            token_length: config.crypto_token_length,
            expires_in_minutes: config.user_token_expires_in_minutes,
            read_ttl_minutes: config.read_ttl_minutes(),
            serialize_updates: config.serialize_session_updates,
            locks: IdentityLocks::default(),
        }
    }

    async fn serialize(&self, id: &UserId) -> Option<OwnedMutexGuard<()>> {
        if self.serialize_updates {
            Some(self.locks.lock(id).await)
        } else {
            None
        }
    }

    fn release(&self, id: &UserId, guard: Option<OwnedMutexGuard<()>>) {
        if let Some(guard) = guard {
            drop(guard);
            self.locks.prune(id);
        }
    }

    /// Create a token for `user` and register it in the user's session index
    pub async fn issue_token(&self, user: &User) -> GateResult<String> {
        let guard = self.serialize(&user.id).await;
        let result = self.issue_token_unlocked(user).await;
        self.release(&user.id, guard);
        result
    }

    async fn issue_token_unlocked(&self, user: &User) -> GateResult<String> {
        let token = token::generate(self.token_length)?;
        let digest = token::digest(&token);
        let id = user.id.as_str();

        let mut snapshot = user.clone();
        snapshot.token = None;

        self.cache
            .store(CACHE_PREFIX_TOKEN, &digest, serde_json::to_value(&user.id)?, self.expires_in_minutes)
            .await?;
        self.cache
            .store(CACHE_PREFIX_USER, id, serde_json::to_value(&snapshot)?, self.expires_in_minutes)
            .await?;

        let mut sessions = self.live_sessions(&user.id).await?;
        sessions.push(digest);
        self.cache
            .store(CACHE_PREFIX_SESSIONS, id, serde_json::to_value(&sessions)?, self.expires_in_minutes)
            .await?;

        tracing::debug!("Issued session token for user {} ({} active)", user.id, sessions.len());
        Ok(token)
    }

    /// Look up the user a token belongs to
    pub async fn resolve_user(&self, token: &str) -> GateResult<User> {
        if token.is_empty() {
            return Err(token_not_found());
        }

        let digest = token::digest(token);
        let id = self
            .cache
            .read(CACHE_PREFIX_TOKEN, &digest, self.read_ttl_minutes)
            .await?
            .ok_or_else(token_not_found)?;
        let id: UserId = decode(id, "user id")?;

        let snapshot = self
            .cache
            .read(CACHE_PREFIX_USER, id.as_str(), self.read_ttl_minutes)
            .await?
            .ok_or_else(user_not_found)?;
        let user: User = decode(snapshot, "user snapshot")?;

        // Keep the index alive alongside its tokens so revocation can still find them
        if self.read_ttl_minutes.is_some() {
            self.cache
                .read(CACHE_PREFIX_SESSIONS, id.as_str(), self.read_ttl_minutes)
                .await?;
        }

        Ok(user)
    }

    /// Invalidate every token issued for `user`
    pub async fn revoke_all(&self, user: &User) -> GateResult<()> {
        let guard = self.serialize(&user.id).await;
        let result = self.revoke_all_unlocked(&user.id).await;
        self.release(&user.id, guard);
        result
    }

    async fn revoke_all_unlocked(&self, id: &UserId) -> GateResult<()> {
        let sessions = self.read_sessions(id).await?;
        if sessions.is_empty() {
            return Ok(());
        }

        for digest in &sessions {
            self.cache.delete(CACHE_PREFIX_TOKEN, digest).await?;
        }
        self.cache.delete(CACHE_PREFIX_USER, id.as_str()).await?;
        self.cache.delete(CACHE_PREFIX_SESSIONS, id.as_str()).await?;

        tracing::info!("Revoked {} session tokens for user {}", sessions.len(), id);
        Ok(())
    }

    /// Number of the user's tokens that still resolve
    pub async fn session_count(&self, id: &UserId) -> GateResult<usize> {
        Ok(self.live_sessions(id).await?.len())
    }

    /// Index entries whose token record has not expired yet
    async fn live_sessions(&self, id: &UserId) -> GateResult<Vec<String>> {
        let mut live = Vec::new();
        for digest in self.read_sessions(id).await? {
            if self.cache.read(CACHE_PREFIX_TOKEN, &digest, None).await?.is_some() {
                live.push(digest);
            }
        }
        Ok(live)
    }

    async fn read_sessions(&self, id: &UserId) -> GateResult<Vec<String>> {
        match self.cache.read(CACHE_PREFIX_SESSIONS, id.as_str(), None).await? {
            Some(value) => decode(value, "session index"),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Authenticator for TokenStore {
    async fn authenticate(&self, token: Option<&str>) -> GateResult<User> {
        let token = token.ok_or_else(|| {
            GateError::authentication("authentication: no token provided", "token not found")
        })?;
        self.resolve_user(token).await
    }
}

fn token_not_found() -> GateError {
    GateError::authentication("authentication: token not found", "token not found")
}

fn user_not_found() -> GateError {
    GateError::authentication("authentication: user not found", "user not found")
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> GateResult<T> {
    serde_json::from_value(value)
        .map_err(|e| GateError::internal_from(format!("corrupt {} in session cache", what), e))
}

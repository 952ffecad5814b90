use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Errors surfaced by a [`Locker`] backend.
///
/// Every consumer in this crate treats these as non-fatal: the cooldown
/// engine fails open and delivery proceeds when the store is unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockerError {
    /// The key does not exist, or its TTL has lapsed.
    NotFound,
    /// The backing store could not serve the request.
    Backend(String),
}

impl LockerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LockerError::NotFound)
    }
}

impl fmt::Display for LockerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockerError::NotFound => write!(f, "value does not exist"),
            LockerError::Backend(message) => write!(f, "locker backend error: {message}"),
        }
    }
}

impl std::error::Error for LockerError {}

/// TTL key-value store used for cooldown and deduplication state.
///
/// Implementations backed by a shared store (Redis, Memcached) give
/// cross-process suppression; [`LocalLocker`] covers the single-process
/// case with no external dependencies.
#[async_trait]
pub trait Locker: Send + Sync {
    /// Sets `key` to `value`, expiring after `ttl`. A zero `ttl` means
    /// the entry never expires.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), LockerError>;
    /// Gets the value for `key`. Returns [`LockerError::NotFound`] when
    /// the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Vec<u8>, LockerError>;
    /// Deletes `key`. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str);
    /// Reports whether `key` exists and has not expired.
    async fn exist(&self, key: &str) -> bool;
    /// The key-segment delimiter accepted by this implementation.
    fn separator(&self) -> &str;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Process-local [`Locker`].
///
/// Entries expire lazily on read. State is lost on restart and is not
/// shared across processes, so suppression windows only hold within one
/// application instance.
#[derive(Default)]
pub struct LocalLocker {
    state: RwLock<HashMap<String, Entry>>,
}

impl LocalLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Locker for LocalLocker {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), LockerError> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        let mut state = self.state.write().await;
        state.insert(
            key.to_owned(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, LockerError> {
        let now = Instant::now();
        {
            let state = self.state.read().await;
            match state.get(key) {
                None => return Err(LockerError::NotFound),
                Some(entry) if !entry.expired(now) => return Ok(entry.value.clone()),
                Some(_) => {}
            }
        }
        self.delete(key).await;
        Err(LockerError::NotFound)
    }

    async fn delete(&self, key: &str) {
        let mut state = self.state.write().await;
        state.remove(key);
    }

    async fn exist(&self, key: &str) -> bool {
        let now = Instant::now();
        let state = self.state.read().await;
        state.get(key).is_some_and(|entry| !entry.expired(now))
    }

    fn separator(&self) -> &str {
        "::"
    }
}

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store backend failed: {0}")]
    Backend(String),
    #[error("failed to (de)serialize value for {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("timed out after {timeout:?} waiting for lock on {key}")]
    LockTimeout { key: String, timeout: Duration },
}

/// Held for as long as the caller owns the key; dropping it releases the lock.
pub struct LockGuard {
    _inner: Box<dyn Any + Send + Sync>,
}

impl LockGuard {
    pub fn new(inner: impl Any + Send + Sync) -> Self {
        LockGuard {
            _inner: Box::new(inner),
        }
    }
}

/// Durable key-value state shared between workers processing the same airports.
///
/// `put` must be atomic per key. `lock` grants exclusive ownership of a key
/// name across every process using the same backend.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn lock(&self, key: &str) -> Result<LockGuard, StoreError>;
}

/// Runs `work` while holding the lock on `key`.
pub async fn with_lock<F, Fut, T>(
    store: &dyn PersistentStore,
    key: &str,
    work: F,
) -> Result<T, StoreError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let _guard = store.lock(key).await?;
    work().await
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn PersistentStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Serialization {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

pub async fn put_json<T: Serialize + Sync>(
    store: &dyn PersistentStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Serialization {
        key: key.to_string(),
        source,
    })?;
    store.put(key, bytes).await
}

/// Process-local store. Suitable for a single worker and for tests.
pub struct InMemoryStore {
    records: Mutex<HashMap<String, Vec<u8>>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    lock_timeout: Duration,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(30))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        InMemoryStore {
            records: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            lock_timeout,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = records.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.remove(key);
        Ok(())
    }

    async fn lock(&self, key: &str) -> Result<LockGuard, StoreError> {
        let mutex = self.key_lock(key);
        match tokio::time::timeout(self.lock_timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(LockGuard::new(guard)),
            Err(_) => Err(StoreError::LockTimeout {
                key: key.to_string(),
                timeout: self.lock_timeout,
            }),
        }
    }
}

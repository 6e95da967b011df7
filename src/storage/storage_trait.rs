//! Key-value persistence interface
//!
//! Backends store opaque byte blobs. The only caller in this crate is
//! [`super::StorePersistence`], which keeps one serialized output store per
//! account.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::errors::FogWalletResult;

#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn get(&self, key: &str) -> FogWalletResult<Option<Vec<u8>>>;

    /// Insert or replace the value under `key`
    async fn set(&self, key: &str, value: &[u8]) -> FogWalletResult<()>;

    async fn has(&self, key: &str) -> FogWalletResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Remove `key`; removing an absent key is not an error
    async fn clear(&self, key: &str) -> FogWalletResult<()>;
}

/// Process-local backend; clones share the same map
#[derive(Debug, Clone, Default)]
pub struct InMemoryPersistence {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryPersistence {
    async fn get(&self, key: &str) -> FogWalletResult<Option<Vec<u8>>> {
        Ok(self.entries().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> FogWalletResult<()> {
        self.entries().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn has(&self, key: &str) -> FogWalletResult<bool> {
        Ok(self.entries().contains_key(key))
    }

    async fn clear(&self, key: &str) -> FogWalletResult<()> {
        self.entries().remove(key);
        Ok(())
    }
}

//! Save and restore an account's output store through a [`PersistenceAdapter`]

use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use crate::{
    errors::FogWalletResult, keys::ViewPrivateKey, scanning::OutputStore,
    storage::PersistenceAdapter,
};

#[derive(Clone)]
pub struct StorePersistence {
    adapter: Arc<dyn PersistenceAdapter>,
}

impl StorePersistence {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>) -> Self {
        Self { adapter }
    }

    pub async fn save(&self, view_key: &ViewPrivateKey, store: &OutputStore) -> FogWalletResult<()> {
        let bytes = store.to_bytes()?;
        #[cfg(feature = "tracing")]
        debug!(
            "Persisting store: {} outputs, synced to {}",
            store.len(),
            store.synced_position()
        );
        self.adapter.set(&view_key.storage_key(), &bytes).await
    }

    /// Load the account's store; `None` when nothing was saved yet.
    ///
    /// A blob that fails to decode is an error, not an empty store.
    pub async fn load(&self, view_key: &ViewPrivateKey) -> FogWalletResult<Option<OutputStore>> {
        let Some(bytes) = self.adapter.get(&view_key.storage_key()).await? else {
            return Ok(None);
        };
        match OutputStore::from_bytes(&bytes) {
            Ok(store) => Ok(Some(store)),
            Err(e) => {
                #[cfg(feature = "tracing")]
                warn!("Persisted store could not be decoded: {}", e);
                Err(e)
            }
        }
    }

    /// Load the saved store or start a fresh one
    pub async fn load_or_default(&self, view_key: &ViewPrivateKey) -> FogWalletResult<OutputStore> {
        Ok(self.load(view_key).await?.unwrap_or_default())
    }

    pub async fn exists(&self, view_key: &ViewPrivateKey) -> FogWalletResult<bool> {
        self.adapter.has(&view_key.storage_key()).await
    }

    pub async fn clear(&self, view_key: &ViewPrivateKey) -> FogWalletResult<()> {
        self.adapter.clear(&view_key.storage_key()).await
    }
}

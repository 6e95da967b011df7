//! Output store shared between one writer and many readers
//!
//! Refreshes are serialized by an async mutex. Each one works on a private
//! copy of the store and publishes it with a single pointer swap, so a
//! reader sees either the store from before the refresh or the one after,
//! never a half-applied round.

use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

use super::{
    collaborators::BlockFetcher,
    output_store::{OutputStore, SyncContext},
    scan_results::{MissResolution, RefreshOutcome},
    snapshot::StoreSnapshot,
};
use crate::{data_structures::BlockRange, errors::FogWalletResult};

#[derive(Debug, Default)]
pub struct SharedOutputStore {
    current: RwLock<Arc<OutputStore>>,
    writer: Mutex<()>,
}

impl SharedOutputStore {
    pub fn new(store: OutputStore) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
            writer: Mutex::new(()),
        }
    }

    /// The most recently published store
    pub fn current(&self) -> Arc<OutputStore> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.current().snapshot()
    }

    pub fn balance(&self, token_id: u64) -> u128 {
        self.current().balance(token_id)
    }

    /// Refresh a private copy and publish it.
    ///
    /// Callers queue behind an in-flight refresh. Rounds reconciled before
    /// a failure are still published.
    pub async fn refresh(&self, ctx: &SyncContext<'_>) -> FogWalletResult<RefreshOutcome> {
        let _writer = self.writer.lock().await;
        let mut working = OutputStore::clone(&self.current());
        let result = working.refresh(ctx).await;
        self.publish(working);
        result
    }

    pub async fn resolve_misses(
        &self,
        ranges: &[BlockRange],
        fetcher: &dyn BlockFetcher,
        ctx: &SyncContext<'_>,
    ) -> FogWalletResult<MissResolution> {
        let _writer = self.writer.lock().await;
        let mut working = OutputStore::clone(&self.current());
        let result = working.resolve_misses(ranges, fetcher, ctx).await;
        self.publish(working);
        result
    }

    /// Take the store back out once no other handle remains
    pub fn into_inner(self) -> OutputStore {
        let current = self
            .current
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::try_unwrap(current).unwrap_or_else(|shared| OutputStore::clone(&shared))
    }

    fn publish(&self, store: OutputStore) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(store);
    }
}

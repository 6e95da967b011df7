//! Refresh configuration

use serde::{Deserialize, Serialize};

use crate::errors::{FogWalletError, FogWalletResult};

/// Upper bound on search keys requested per seed in one round
pub const MAX_BATCH_SIZE_LIMIT: usize = 4096;

/// Parameters of one `refresh` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Query rounds a single refresh may issue
    pub max_rounds: usize,
    /// Search keys requested for a seed that has not yet filled a batch
    pub initial_batch_size: usize,
    /// Ceiling for the per-seed batch once it starts scaling
    pub max_batch_size: usize,
    /// Largest range handed to the block fetcher in one call
    #[serde(default = "default_miss_chunk_size")]
    pub miss_chunk_size: u64,
}

fn default_miss_chunk_size() -> u64 {
    1_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            initial_batch_size: 10,
            max_batch_size: 160,
            miss_chunk_size: default_miss_chunk_size(),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Larger batches and more rounds for long-lived services
    pub fn production() -> Self {
        Self {
            max_rounds: 50,
            initial_batch_size: 20,
            max_batch_size: 1_280,
            miss_chunk_size: 5_000,
        }
    }

    /// Small batches so tests exercise multi-round behavior
    pub fn development() -> Self {
        Self {
            max_rounds: 5,
            initial_batch_size: 2,
            max_batch_size: 8,
            miss_chunk_size: 100,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_initial_batch_size(mut self, batch_size: usize) -> Self {
        self.initial_batch_size = batch_size;
        self
    }

    pub fn with_max_batch_size(mut self, batch_size: usize) -> Self {
        self.max_batch_size = batch_size;
        self
    }

    pub fn with_miss_chunk_size(mut self, chunk_size: u64) -> Self {
        self.miss_chunk_size = chunk_size;
        self
    }

    pub fn from_json(json: &str) -> FogWalletResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FogWalletError::ConfigError(format!("invalid sync config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> FogWalletResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FogWalletError::ConfigError(format!("cannot encode sync config: {e}")))
    }

    pub fn validate(&self) -> FogWalletResult<()> {
        if self.max_rounds == 0 {
            return Err(FogWalletError::ConfigError(
                "max_rounds must be greater than 0".to_string(),
            ));
        }
        if self.initial_batch_size == 0 {
            return Err(FogWalletError::ConfigError(
                "initial_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.max_batch_size < self.initial_batch_size {
            return Err(FogWalletError::ConfigError(format!(
                "max_batch_size {} is below initial_batch_size {}",
                self.max_batch_size, self.initial_batch_size
            )));
        }
        if self.max_batch_size > MAX_BATCH_SIZE_LIMIT {
            return Err(FogWalletError::ConfigError(format!(
                "max_batch_size should not exceed {MAX_BATCH_SIZE_LIMIT}"
            )));
        }
        if self.miss_chunk_size == 0 {
            return Err(FogWalletError::ConfigError(
                "miss_chunk_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

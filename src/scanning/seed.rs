//! Search-key generator lifecycle
//!
//! Every ingest invocation on the server hands the account one seed record.
//! The record's public key, exchanged with the view key, yields a
//! [`KexRng`] whose successive outputs are the search keys under which that
//! invocation stores the account's outputs. A seed moves one way, from
//! active to obsolete, and obsolete seeds stay in the map until a newer
//! record for the same invocation supersedes them.

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::BTreeMap;

use super::{
    config::SyncConfig,
    protocol::{SearchKey, SeedRecord},
};
use crate::{errors::SerializationError, keys::ViewPrivateKey, rng::KexRng};

/// One server-issued generator and its progress
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Seed {
    invocation_id: i64,
    rng: KexRng,
    start_position: u64,
    synced_position: u64,
    obsolete: bool,
    consecutive_full_batches: u32,
}

impl Seed {
    /// Run the key exchange for a freshly announced record
    pub fn from_record(
        view_key: &ViewPrivateKey,
        record: &SeedRecord,
    ) -> Result<Self, SerializationError> {
        let rng = KexRng::from_key_exchange(view_key, &record.public_key, record.version, 0)?;
        Ok(Self {
            invocation_id: record.invocation_id,
            rng,
            start_position: record.start_position,
            synced_position: record.start_position,
            obsolete: false,
            consecutive_full_batches: 0,
        })
    }

    pub fn invocation_id(&self) -> i64 {
        self.invocation_id
    }

    pub fn rng(&self) -> &KexRng {
        &self.rng
    }

    pub fn start_position(&self) -> u64 {
        self.start_position
    }

    /// Ledger positions below this value hold no undiscovered output of this seed
    pub fn synced_position(&self) -> u64 {
        self.synced_position
    }

    /// Search keys consumed so far
    pub fn keys_consumed(&self) -> u64 {
        self.rng.counter()
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete
    }

    /// Rounds in a row in which every requested key matched
    pub fn consecutive_full_batches(&self) -> u32 {
        self.consecutive_full_batches
    }
}

/// Decides how many search keys to request for a seed this round
pub trait SearchKeyBatchPolicy: Send + Sync {
    fn batch_size(&self, seed: &Seed) -> usize;
}

/// Starts small and doubles while a seed keeps filling its batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBatchPolicy {
    pub initial: usize,
    pub max: usize,
}

impl ExponentialBatchPolicy {
    pub fn new(initial: usize, max: usize) -> Self {
        let initial = initial.max(1);
        Self {
            initial,
            max: max.max(initial),
        }
    }
}

impl From<&SyncConfig> for ExponentialBatchPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self::new(config.initial_batch_size, config.max_batch_size)
    }
}

impl Default for ExponentialBatchPolicy {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl SearchKeyBatchPolicy for ExponentialBatchPolicy {
    fn batch_size(&self, seed: &Seed) -> usize {
        let shift = seed.consecutive_full_batches();
        if shift >= self.initial.leading_zeros() {
            return self.max;
        }
        (self.initial << shift).min(self.max)
    }
}

/// Keys derived for one seed in one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedBatch {
    pub invocation_id: i64,
    pub keys: Vec<SearchKey>,
}

/// What one round established about one seed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedProgress {
    pub invocation_id: i64,
    /// Keys at the front of the batch that matched an output
    pub keys_consumed: u64,
    /// A key came back `NotFound`: the seed has nothing beyond the tip
    pub caught_up: bool,
    /// Every key of the batch matched
    pub batch_filled: bool,
    /// Highest received-position among the outputs found this round
    pub highest_found: Option<u64>,
}

/// Result of offering a seed record to the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedInsert {
    Added,
    /// An obsolete seed with the same invocation id was replaced
    Superseded,
    /// The invocation already has an active seed
    Ignored,
}

/// Map of invocation id to seed
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SeedManager {
    seeds: BTreeMap<i64, Seed>,
}

impl SeedManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    pub fn get(&self, invocation_id: i64) -> Option<&Seed> {
        self.seeds.get(&invocation_id)
    }

    /// All seeds in invocation id order, obsolete ones included
    pub fn iter(&self) -> impl Iterator<Item = &Seed> {
        self.seeds.values()
    }

    pub fn active(&self) -> impl Iterator<Item = &Seed> {
        self.seeds.values().filter(|seed| !seed.obsolete)
    }

    /// Every invocation id the client holds, so the server only sends new records
    pub fn known_invocation_ids(&self) -> Vec<i64> {
        self.seeds.keys().copied().collect()
    }

    /// Next unconsumed keys of every active seed; nothing is advanced
    pub fn derive_batches(&self, policy: &dyn SearchKeyBatchPolicy) -> Vec<SeedBatch> {
        self.active()
            .map(|seed| SeedBatch {
                invocation_id: seed.invocation_id,
                keys: seed
                    .rng
                    .peek(policy.batch_size(seed))
                    .into_iter()
                    .map(SearchKey::from)
                    .collect(),
            })
            .filter(|batch| !batch.keys.is_empty())
            .collect()
    }

    /// Insert a seed built from a server record
    pub fn insert(&mut self, seed: Seed) -> SeedInsert {
        match self.seeds.get(&seed.invocation_id) {
            Some(existing) if !existing.obsolete => SeedInsert::Ignored,
            Some(_) => {
                self.seeds.insert(seed.invocation_id, seed);
                SeedInsert::Superseded
            }
            None => {
                self.seeds.insert(seed.invocation_id, seed);
                SeedInsert::Added
            }
        }
    }

    /// Whether a record for `invocation_id` would change anything
    pub fn accepts(&self, invocation_id: i64) -> bool {
        self.seeds
            .get(&invocation_id)
            .map_or(true, |seed| seed.obsolete)
    }

    /// Returns `true` when the seed was active
    pub fn mark_obsolete(&mut self, invocation_id: i64) -> bool {
        match self.seeds.get_mut(&invocation_id) {
            Some(seed) if !seed.obsolete => {
                seed.obsolete = true;
                true
            }
            _ => false,
        }
    }

    /// Advance a seed past a reconciled round
    ///
    /// Returns `true` when the generator ran out of counter space and the
    /// seed became obsolete as a result.
    pub fn apply_progress(&mut self, progress: &SeedProgress, tip_position: u64) -> bool {
        let Some(seed) = self.seeds.get_mut(&progress.invocation_id) else {
            return false;
        };
        if seed.obsolete {
            return false;
        }
        seed.rng.advance_by(progress.keys_consumed);
        if progress.caught_up {
            seed.synced_position = seed.synced_position.max(tip_position);
            seed.consecutive_full_batches = 0;
        } else {
            if let Some(highest) = progress.highest_found {
                seed.synced_position = seed.synced_position.max(highest);
            }
            if progress.batch_filled {
                seed.consecutive_full_batches = seed.consecutive_full_batches.saturating_add(1);
            }
        }
        if seed.rng.is_exhausted() {
            seed.obsolete = true;
            return true;
        }
        false
    }

    /// Lowest position an active seed may still hold undiscovered outputs at
    pub fn min_active_synced_position(&self) -> Option<u64> {
        self.active().map(|seed| seed.synced_position).min()
    }
}

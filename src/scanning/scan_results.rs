//! Results reported by refresh and miss resolution

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::data_structures::BlockRange;

/// Changes applied by one reconciled query round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// Search keys sent in the round
    pub keys_requested: usize,
    /// Outputs inserted; repeats of stored outputs are not counted
    pub new_outputs: usize,
    /// Found results whose ciphertext did not open with the view key
    pub decryption_failures: usize,
    pub new_seeds: usize,
    /// Seeds that became obsolete, by server signal or local exhaustion
    pub obsoleted_seeds: usize,
    pub new_misses: usize,
    pub synced_position: u64,
    /// Some seed filled its whole batch or a seed was added
    pub needs_another_round: bool,
}

/// Outcome of [`super::OutputStore::refresh`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub rounds: Vec<RoundSummary>,
    /// Outputs newly marked spent after the rounds
    pub spent_marked: usize,
    pub previous_synced_position: u64,
    pub synced_position: u64,
    /// Ranges still waiting for a direct scan, smallest start first
    pub misses: Vec<BlockRange>,
    /// Wall time of the call
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RefreshOutcome {
    pub fn new(previous_synced_position: u64) -> Self {
        Self {
            previous_synced_position,
            synced_position: previous_synced_position,
            ..Default::default()
        }
    }

    pub fn new_outputs(&self) -> usize {
        self.rounds.iter().map(|round| round.new_outputs).sum()
    }

    pub fn new_seeds(&self) -> usize {
        self.rounds.iter().map(|round| round.new_seeds).sum()
    }

    pub fn keys_requested(&self) -> usize {
        self.rounds.iter().map(|round| round.keys_requested).sum()
    }

    pub fn watermark_advanced(&self) -> bool {
        self.synced_position > self.previous_synced_position
    }
}

/// Outcome of [`super::OutputStore::resolve_misses`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissResolution {
    /// Ranges fully scanned, in the order given
    pub resolved: Vec<BlockRange>,
    pub records_scanned: usize,
    pub new_outputs: usize,
}

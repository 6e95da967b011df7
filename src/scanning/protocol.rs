//! Messages exchanged with the oblivious query service and ledger services

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    data_structures::{BlockRange, KeyImage, OutputPublicKey, SpentInfo},
    rng::{KexRngOutput, KEX_RNG_OUTPUT_LEN},
};

/// Blinded search key sent to the oblivious index
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, BorshSerialize,
    BorshDeserialize,
)]
pub struct SearchKey(pub [u8; KEX_RNG_OUTPUT_LEN]);

impl From<KexRngOutput> for SearchKey {
    fn from(output: KexRngOutput) -> Self {
        SearchKey(output)
    }
}

impl fmt::Debug for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SearchKey({})", hex::encode(self.0))
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Server-issued record announcing a new search-key generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRecord {
    /// Server-assigned id of the ingest invocation
    pub invocation_id: i64,
    /// Server public key for this invocation; the key exchange peer
    pub public_key: Vec<u8>,
    /// Generator version
    pub version: u32,
    /// First ledger position the invocation processed
    pub start_position: u64,
}

/// Outcome of one search key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchResultStatus {
    /// Nothing stored under this key yet
    NotFound,
    /// An output encrypted to the account view key
    Found { ciphertext: Vec<u8> },
    /// The server considers the key malformed
    BadSearchKey,
    /// The server failed to process the key
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub search_key: SearchKey,
    pub status: SearchResultStatus,
}

impl SearchResult {
    pub fn found(search_key: SearchKey, ciphertext: Vec<u8>) -> Self {
        Self {
            search_key,
            status: SearchResultStatus::Found { ciphertext },
        }
    }

    pub fn not_found(search_key: SearchKey) -> Self {
        Self {
            search_key,
            status: SearchResultStatus::NotFound,
        }
    }
}

/// One oblivious query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Invocations the client already holds seeds for
    pub known_invocation_ids: Vec<i64>,
    pub search_keys: Vec<SearchKey>,
}

/// Reply to a [`QueryRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Records for invocations absent from `known_invocation_ids`
    pub new_seed_records: Vec<SeedRecord>,
    pub search_results: Vec<SearchResult>,
    /// Number of ledger positions the service has processed
    pub tip_position: u64,
    /// Invocations that will never match another key
    #[serde(default)]
    pub exhausted_invocation_ids: Vec<i64>,
    /// Ranges no invocation processed; they need a direct scan
    #[serde(default)]
    pub missed_block_ranges: Vec<BlockRange>,
}

/// Raw ledger entry returned by the block-fetch service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub public_key: OutputPublicKey,
    pub ciphertext: Vec<u8>,
    pub position: u64,
    pub time: u64,
}

/// Spent status of one key image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyImageStatus {
    pub key_image: KeyImage,
    /// Present once the key image appears on the ledger
    pub spent: Option<SpentInfo>,
}

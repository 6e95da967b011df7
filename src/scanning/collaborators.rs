//! Contracts for the external services the store drives
//!
//! Implementations own transport, attestation and timeouts. A timeout is
//! reported as [`ServiceError::Timeout`] and the store treats it like any
//! other failed round: nothing from that round is committed.

use async_trait::async_trait;

use super::protocol::{KeyImageStatus, LedgerRecord, QueryRequest, QueryResponse};
use crate::{
    data_structures::{BlockRange, KeyImage},
    errors::ServiceError,
};

/// Attested oblivious query service
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, ServiceError>;
}

/// Raw ledger access used for direct scanning of missed ranges
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    async fn fetch(&self, range: &BlockRange) -> Result<Vec<LedgerRecord>, ServiceError>;
}

/// Reports which key images have appeared on the ledger
#[async_trait]
pub trait KeyImageChecker: Send + Sync {
    async fn check(&self, key_images: &[KeyImage]) -> Result<Vec<KeyImageStatus>, ServiceError>;
}

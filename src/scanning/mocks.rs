//! Mock collaborators for deterministic testing
//!
//! [`MockQueryService`] simulates an oblivious index: every invocation has
//! its own server key, and the search key of the n-th output is the n-th
//! output of the server side of the key-exchange RNG. Payloads are sealed
//! with the reference [`VersionedCryptoBox`], so the store under test runs
//! its real decryption path.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rand::rngs::OsRng;

use super::{
    cancellation::CancellationHandle,
    collaborators::{BlockFetcher, KeyImageChecker, QueryService},
    protocol::{
        KeyImageStatus, LedgerRecord, QueryRequest, QueryResponse, SearchKey, SearchResult,
        SearchResultStatus, SeedRecord,
    },
};
use crate::{
    crypto_box::VersionedCryptoBox,
    data_structures::{BlockRange, KeyImage, OutputPayload, OutputPublicKey, SpentInfo},
    errors::ServiceError,
    keys::{PublicKeyBytes, ViewPrivateKey},
    rng::KexRng,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Encrypt to `recipient`; an invalid recipient key yields an empty ciphertext
fn seal(recipient: &PublicKeyBytes, plaintext: &[u8]) -> Vec<u8> {
    VersionedCryptoBox::new()
        .encrypt(&recipient.0, plaintext, &mut OsRng)
        .unwrap_or_default()
}

fn encode(payload: &OutputPayload) -> Vec<u8> {
    payload.to_bytes().unwrap_or_default()
}

struct MockInvocation {
    record: SeedRecord,
    /// Secret shared with the account; the server side of the exchange
    shared_secret: [u8; 32],
    ciphertexts: Vec<Vec<u8>>,
    exhausted: bool,
}

impl MockInvocation {
    fn search_key(&self, index: usize) -> Option<SearchKey> {
        KexRng::new(&self.shared_secret, &self.record.public_key, index as u64)
            .ok()
            .map(|rng| SearchKey(rng.get_output()))
    }
}

#[derive(Default)]
struct MockIndexState {
    invocations: BTreeMap<i64, MockInvocation>,
    tip_position: u64,
    missed_ranges: Vec<BlockRange>,
    overrides: HashMap<SearchKey, SearchResultStatus>,
    injected: Vec<SearchResult>,
    failures: VecDeque<ServiceError>,
    requests: Vec<QueryRequest>,
    cancel_on_query: Option<CancellationHandle>,
}

/// In-memory oblivious query service
#[derive(Clone)]
pub struct MockQueryService {
    account: PublicKeyBytes,
    state: Arc<Mutex<MockIndexState>>,
}

impl MockQueryService {
    /// Service indexing outputs for the account with this view public key
    pub fn new(account: PublicKeyBytes) -> Self {
        Self {
            account,
            state: Arc::new(Mutex::new(MockIndexState::default())),
        }
    }

    /// Start an ingest invocation; its record is offered to clients that do not know it
    pub fn start_invocation(&self, invocation_id: i64, start_position: u64) -> SeedRecord {
        let server_key = ViewPrivateKey::random(&mut OsRng);
        let record = SeedRecord {
            invocation_id,
            public_key: server_key.public_key().0.to_vec(),
            version: 1,
            start_position,
        };
        let shared_secret = server_key
            .shared_secret(&self.account.0)
            .unwrap_or_default();
        lock(&self.state).invocations.insert(
            invocation_id,
            MockInvocation {
                record: record.clone(),
                shared_secret,
                ciphertexts: Vec::new(),
                exhausted: false,
            },
        );
        record
    }

    /// Store an output for the account under the invocation's next search key.
    /// The tip grows to cover the output's position.
    pub fn add_output(&self, invocation_id: i64, payload: &OutputPayload) {
        let ciphertext = seal(&self.account, &encode(payload));
        let mut state = lock(&self.state);
        state.tip_position = state.tip_position.max(payload.received_position + 1);
        if let Some(invocation) = state.invocations.get_mut(&invocation_id) {
            invocation.ciphertexts.push(ciphertext);
        }
    }

    /// Store a ciphertext addressed to some other account
    pub fn add_foreign_output(&self, invocation_id: i64) {
        let stranger = ViewPrivateKey::random(&mut OsRng).public_key();
        let ciphertext = seal(&stranger, b"not for this account");
        self.add_ciphertext(invocation_id, ciphertext);
    }

    /// Store arbitrary bytes under the invocation's next search key
    pub fn add_ciphertext(&self, invocation_id: i64, ciphertext: Vec<u8>) {
        if let Some(invocation) = lock(&self.state).invocations.get_mut(&invocation_id) {
            invocation.ciphertexts.push(ciphertext);
        }
    }

    /// Search key `index` of an invocation, as the client will derive it
    pub fn search_key(&self, invocation_id: i64, index: usize) -> Option<SearchKey> {
        lock(&self.state)
            .invocations
            .get(&invocation_id)
            .and_then(|invocation| invocation.search_key(index))
    }

    pub fn exhaust_invocation(&self, invocation_id: i64) {
        if let Some(invocation) = lock(&self.state).invocations.get_mut(&invocation_id) {
            invocation.exhausted = true;
        }
    }

    pub fn set_tip_position(&self, tip_position: u64) {
        lock(&self.state).tip_position = tip_position;
    }

    /// Report `range` as missed in the next reply only
    pub fn add_missed_range(&self, range: BlockRange) {
        lock(&self.state).missed_ranges.push(range);
    }

    /// Answer `key` with `status` whenever it is queried
    pub fn override_result(&self, key: SearchKey, status: SearchResultStatus) {
        lock(&self.state).overrides.insert(key, status);
    }

    /// Append `result` to every reply, whether requested or not
    pub fn inject_result(&self, result: SearchResult) {
        lock(&self.state).injected.push(result);
    }

    /// Fail the next query with `error`
    pub fn fail_next(&self, error: ServiceError) {
        lock(&self.state).failures.push_back(error);
    }

    /// Trigger `handle` while answering the next query
    pub fn cancel_on_query(&self, handle: CancellationHandle) {
        lock(&self.state).cancel_on_query = Some(handle);
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<QueryRequest> {
        lock(&self.state).requests.clone()
    }
}

#[async_trait]
impl QueryService for MockQueryService {
    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, ServiceError> {
        let mut state = lock(&self.state);
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        state.requests.push(request.clone());
        if let Some(handle) = state.cancel_on_query.take() {
            handle.cancel();
        }

        let known: HashSet<i64> = request.known_invocation_ids.iter().copied().collect();
        let mut stored: HashMap<SearchKey, Vec<u8>> = HashMap::new();
        for invocation in state.invocations.values() {
            for (index, ciphertext) in invocation.ciphertexts.iter().enumerate() {
                if let Some(key) = invocation.search_key(index) {
                    stored.insert(key, ciphertext.clone());
                }
            }
        }

        let mut search_results: Vec<SearchResult> = request
            .search_keys
            .iter()
            .map(|key| {
                let status = match state.overrides.get(key) {
                    Some(status) => status.clone(),
                    None => match stored.get(key) {
                        Some(ciphertext) => SearchResultStatus::Found {
                            ciphertext: ciphertext.clone(),
                        },
                        None => SearchResultStatus::NotFound,
                    },
                };
                SearchResult {
                    search_key: *key,
                    status,
                }
            })
            .collect();
        search_results.extend(state.injected.iter().cloned());

        Ok(QueryResponse {
            new_seed_records: state
                .invocations
                .values()
                .filter(|invocation| !known.contains(&invocation.record.invocation_id))
                .map(|invocation| invocation.record.clone())
                .collect(),
            search_results,
            tip_position: state.tip_position,
            exhausted_invocation_ids: state
                .invocations
                .values()
                .filter(|invocation| invocation.exhausted)
                .map(|invocation| invocation.record.invocation_id)
                .collect(),
            missed_block_ranges: std::mem::take(&mut state.missed_ranges),
        })
    }
}

#[derive(Default)]
struct MockLedgerState {
    records: Vec<LedgerRecord>,
    failures: VecDeque<ServiceError>,
    fetched: Vec<BlockRange>,
}

/// In-memory ledger for direct scanning
#[derive(Clone, Default)]
pub struct MockBlockFetcher {
    state: Arc<Mutex<MockLedgerState>>,
}

impl MockBlockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&self, record: LedgerRecord) {
        lock(&self.state).records.push(record);
    }

    /// Record an output for `account` at the payload's position
    pub fn add_output(&self, account: &PublicKeyBytes, payload: &OutputPayload) {
        self.add_record(LedgerRecord {
            public_key: payload.public_key,
            ciphertext: seal(account, &encode(payload)),
            position: payload.received_position,
            time: payload.received_time,
        });
    }

    /// Record an output that belongs to a different account
    pub fn add_foreign_record(&self, public_key: OutputPublicKey, position: u64) {
        let stranger = ViewPrivateKey::random(&mut OsRng).public_key();
        self.add_record(LedgerRecord {
            public_key,
            ciphertext: seal(&stranger, b"not for this account"),
            position,
            time: 0,
        });
    }

    pub fn fail_next(&self, error: ServiceError) {
        lock(&self.state).failures.push_back(error);
    }

    /// Ranges requested so far
    pub fn fetched(&self) -> Vec<BlockRange> {
        lock(&self.state).fetched.clone()
    }
}

#[async_trait]
impl BlockFetcher for MockBlockFetcher {
    async fn fetch(&self, range: &BlockRange) -> Result<Vec<LedgerRecord>, ServiceError> {
        let mut state = lock(&self.state);
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        state.fetched.push(*range);
        let mut records: Vec<LedgerRecord> = state
            .records
            .iter()
            .filter(|record| range.contains(record.position))
            .cloned()
            .collect();
        records.sort_by_key(|record| record.position);
        Ok(records)
    }
}

/// Key images known to be on the ledger
#[derive(Clone, Default)]
pub struct MockKeyImageChecker {
    spent: Arc<Mutex<HashMap<KeyImage, SpentInfo>>>,
    failures: Arc<Mutex<VecDeque<ServiceError>>>,
}

impl MockKeyImageChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_spent(&self, key_image: KeyImage, position: u64, time: u64) {
        lock(&self.spent).insert(key_image, SpentInfo { position, time });
    }

    pub fn fail_next(&self, error: ServiceError) {
        lock(&self.failures).push_back(error);
    }
}

#[async_trait]
impl KeyImageChecker for MockKeyImageChecker {
    async fn check(&self, key_images: &[KeyImage]) -> Result<Vec<KeyImageStatus>, ServiceError> {
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }
        let spent = lock(&self.spent);
        Ok(key_images
            .iter()
            .map(|key_image| KeyImageStatus {
                key_image: *key_image,
                spent: spent.get(key_image).copied(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto_box::CryptoBox;

    #[tokio::test]
    async fn test_mock_index_matches_client_keys() {
        let view_key = ViewPrivateKey::random(&mut OsRng);
        let service = MockQueryService::new(view_key.public_key());
        let record = service.start_invocation(4, 10);
        let payload = OutputPayload {
            public_key: OutputPublicKey([1u8; 32]),
            token_id: 0,
            value: 9,
            key_image: None,
            received_position: 12,
            received_time: 0,
            subaddress_index: 0,
        };
        service.add_output(4, &payload);

        let client = KexRng::from_key_exchange(&view_key, &record.public_key, 1, 0).unwrap();
        let key = SearchKey(client.get_output());
        assert_eq!(service.search_key(4, 0), Some(key));

        let response = service
            .query(&QueryRequest {
                known_invocation_ids: vec![],
                search_keys: vec![key],
            })
            .await
            .unwrap();
        assert_eq!(response.new_seed_records, vec![record]);
        assert_eq!(response.tip_position, 13);
        let SearchResultStatus::Found { ciphertext } = &response.search_results[0].status else {
            panic!("expected a found result");
        };
        let plaintext = VersionedCryptoBox::new()
            .decrypt(&view_key, ciphertext)
            .unwrap();
        assert_eq!(OutputPayload::from_bytes(&plaintext).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_mock_failures_are_one_shot() {
        let service = MockQueryService::new(ViewPrivateKey::random(&mut OsRng).public_key());
        service.fail_next(ServiceError::Timeout);
        let request = QueryRequest::default();
        assert_eq!(service.query(&request).await, Err(ServiceError::Timeout));
        assert!(service.query(&request).await.is_ok());
        assert_eq!(service.requests().len(), 1);

        let fetcher = MockBlockFetcher::new();
        fetcher.fail_next(ServiceError::Network("reset".into()));
        let range = BlockRange::new(0, 10).unwrap();
        assert!(fetcher.fetch(&range).await.is_err());
        assert!(fetcher.fetch(&range).await.unwrap().is_empty());
        assert_eq!(fetcher.fetched(), vec![range]);
    }

    #[tokio::test]
    async fn test_missed_ranges_reported_once() {
        let service = MockQueryService::new(ViewPrivateKey::random(&mut OsRng).public_key());
        let range = BlockRange::new(5, 8).unwrap();
        service.add_missed_range(range);
        let request = QueryRequest::default();
        assert_eq!(
            service.query(&request).await.unwrap().missed_block_ranges,
            vec![range]
        );
        assert!(service
            .query(&request)
            .await
            .unwrap()
            .missed_block_ranges
            .is_empty());
    }
}

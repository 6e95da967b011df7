//! Per-account output store and the sync engine that maintains it
//!
//! A refresh runs query rounds against the oblivious index. Each round is
//! handled in two phases:
//!
//! 1. `plan_round` validates the whole reply and decrypts every result
//!    without touching the store. Any protocol violation aborts here.
//! 2. `apply_round` commits the plan. It cannot fail, so a round is either
//!    fully applied or not applied at all.
//!
//! The synchronized position (watermark) is the lowest position any active
//! seed may still hold an undiscovered output at, capped by the server tip.
//! It never decreases.

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::{btree_map::Entry, BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::{debug, info, warn};

use super::{
    cancellation::{CancellationToken, NeverCancelToken},
    collaborators::{BlockFetcher, KeyImageChecker, QueryService},
    config::SyncConfig,
    protocol::{LedgerRecord, QueryRequest, QueryResponse, SearchKey, SearchResultStatus},
    scan_results::{MissResolution, RefreshOutcome, RoundSummary},
    seed::{
        ExponentialBatchPolicy, SearchKeyBatchPolicy, Seed, SeedBatch, SeedInsert, SeedManager,
        SeedProgress,
    },
    snapshot::StoreSnapshot,
};
use crate::{
    crypto_box::CryptoBox,
    data_structures::{BlockRange, KeyImage, OutputPayload, OutputPublicKey, OwnedOutput, SpentInfo},
    errors::{FogWalletError, FogWalletResult, SerializationError},
    keys::ViewPrivateKey,
};

/// Leading byte of the serialized store
pub const STORE_FORMAT_VERSION: u8 = 1;

static NEVER_CANCEL: NeverCancelToken = NeverCancelToken;

/// Collaborators and settings for one refresh or miss resolution
#[derive(Clone, Copy)]
pub struct SyncContext<'a> {
    pub view_key: &'a ViewPrivateKey,
    pub query_service: &'a dyn QueryService,
    pub crypto_box: &'a dyn CryptoBox,
    /// Spent tracking is skipped without a checker
    pub key_image_checker: Option<&'a dyn KeyImageChecker>,
    /// Defaults to an [`ExponentialBatchPolicy`] built from `config`
    pub batch_policy: Option<&'a dyn SearchKeyBatchPolicy>,
    pub cancellation: &'a dyn CancellationToken,
    pub config: SyncConfig,
}

impl<'a> SyncContext<'a> {
    pub fn new(
        view_key: &'a ViewPrivateKey,
        query_service: &'a dyn QueryService,
        crypto_box: &'a dyn CryptoBox,
    ) -> Self {
        Self {
            view_key,
            query_service,
            crypto_box,
            key_image_checker: None,
            batch_policy: None,
            cancellation: &NEVER_CANCEL,
            config: SyncConfig::default(),
        }
    }

    pub fn with_key_image_checker(mut self, checker: &'a dyn KeyImageChecker) -> Self {
        self.key_image_checker = Some(checker);
        self
    }

    pub fn with_batch_policy(mut self, policy: &'a dyn SearchKeyBatchPolicy) -> Self {
        self.batch_policy = Some(policy);
        self
    }

    pub fn with_cancellation(mut self, token: &'a dyn CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    fn check_cancelled(&self) -> FogWalletResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(FogWalletError::Cancelled);
        }
        Ok(())
    }
}

/// Stored outcome of one search key
enum KeyOutcome {
    Found(Vec<u8>),
    NotFound,
}

/// Fully validated effect of one query reply
struct RoundUpdate {
    tip_position: u64,
    keys_requested: usize,
    progress: Vec<SeedProgress>,
    outputs: Vec<OwnedOutput>,
    decryption_failures: usize,
    new_seeds: Vec<Seed>,
    exhausted_invocation_ids: Vec<i64>,
    misses: Vec<BlockRange>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct PersistedStore {
    outputs: Vec<OwnedOutput>,
    seeds: SeedManager,
    synced_position: u64,
    pending_misses: Vec<BlockRange>,
}

/// Outputs, seeds and sync progress of one account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputStore {
    outputs: BTreeMap<OutputPublicKey, OwnedOutput>,
    seeds: SeedManager,
    synced_position: u64,
    pending_misses: BTreeSet<BlockRange>,
}

fn invalid_response(message: String) -> FogWalletError {
    FogWalletError::InvalidRemoteResponse(message)
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest position below which every owned output is known
    pub fn synced_position(&self) -> u64 {
        self.synced_position
    }

    pub fn seeds(&self) -> &SeedManager {
        &self.seeds
    }

    /// Every stored output, including ones above the watermark
    pub fn outputs(&self) -> impl Iterator<Item = &OwnedOutput> {
        self.outputs.values()
    }

    pub fn get_output(&self, public_key: &OutputPublicKey) -> Option<&OwnedOutput> {
        self.outputs.get(public_key)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Ranges reported missed and not yet resolved
    pub fn pending_misses(&self) -> Vec<BlockRange> {
        self.pending_misses.iter().copied().collect()
    }

    /// Outputs below the watermark, frozen at this instant
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot::new(
            self.synced_position,
            self.outputs
                .values()
                .filter(|output| output.received_position() < self.synced_position)
                .cloned()
                .collect(),
        )
    }

    /// Unspent value of `token_id` below the watermark
    pub fn balance(&self, token_id: u64) -> u128 {
        self.snapshot().balance(token_id)
    }

    /// Unspent outputs of `token_id` below the watermark, in ledger order
    pub fn unspent_outputs(&self, token_id: u64) -> Vec<OwnedOutput> {
        self.snapshot().unspent_outputs(token_id)
    }

    /// Run query rounds until every seed has caught up or `max_rounds` is hit.
    ///
    /// On error the store keeps every round reconciled before the failure.
    pub async fn refresh(&mut self, ctx: &SyncContext<'_>) -> FogWalletResult<RefreshOutcome> {
        ctx.config.validate()?;
        let started = Instant::now();
        let default_policy = ExponentialBatchPolicy::from(&ctx.config);
        let policy: &dyn SearchKeyBatchPolicy = match ctx.batch_policy {
            Some(policy) => policy,
            None => &default_policy,
        };
        let mut outcome = RefreshOutcome::new(self.synced_position);

        for _round in 0..ctx.config.max_rounds {
            ctx.check_cancelled()?;
            let batches = self.seeds.derive_batches(policy);
            let request = QueryRequest {
                known_invocation_ids: self.seeds.known_invocation_ids(),
                search_keys: batches
                    .iter()
                    .flat_map(|batch| batch.keys.iter().copied())
                    .collect(),
            };
            #[cfg(feature = "tracing")]
            debug!(
                "Refresh round {}: {} search keys across {} seeds",
                _round + 1,
                request.search_keys.len(),
                batches.len()
            );

            let response = ctx.query_service.query(&request).await?;
            if ctx.cancellation.is_cancelled() {
                #[cfg(feature = "tracing")]
                debug!("Refresh cancelled after round {} reply", _round + 1);
                return Err(FogWalletError::Cancelled);
            }

            let update = self.plan_round(&batches, response, ctx)?;
            let summary = self.apply_round(update);
            #[cfg(feature = "tracing")]
            debug!(
                "Round {} applied: {} new outputs, {} new seeds, watermark {}",
                _round + 1,
                summary.new_outputs,
                summary.new_seeds,
                summary.synced_position
            );
            let again = summary.needs_another_round;
            outcome.rounds.push(summary);
            if !again {
                break;
            }
        }

        outcome.spent_marked = self.refresh_spent_status(ctx).await?;
        outcome.synced_position = self.synced_position;
        outcome.misses = self.pending_misses();
        outcome.elapsed = started.elapsed();
        #[cfg(feature = "tracing")]
        info!(
            "Refresh finished in {:?}: {} rounds, {} new outputs, watermark {} -> {}",
            outcome.elapsed,
            outcome.rounds.len(),
            outcome.new_outputs(),
            outcome.previous_synced_position,
            outcome.synced_position
        );
        Ok(outcome)
    }

    /// Scan `ranges` directly and add every record that opens with the view key.
    ///
    /// Insertion is additive: a stored output is never replaced. Each range
    /// is committed as a unit once all of its chunks have been scanned.
    pub async fn resolve_misses(
        &mut self,
        ranges: &[BlockRange],
        fetcher: &dyn BlockFetcher,
        ctx: &SyncContext<'_>,
    ) -> FogWalletResult<MissResolution> {
        let mut resolution = MissResolution::default();
        for range in ranges {
            let mut found = Vec::new();
            for chunk in range.chunks(ctx.config.miss_chunk_size) {
                ctx.check_cancelled()?;
                let records = fetcher.fetch(&chunk).await?;
                resolution.records_scanned += records.len();
                found.extend(trial_decrypt(&records, &chunk, ctx)?);
            }

            let mut inserted = 0usize;
            for output in found {
                if self.insert_output(output) {
                    inserted += 1;
                }
            }
            resolution.new_outputs += inserted;
            self.pending_misses = self
                .pending_misses
                .iter()
                .flat_map(|pending| pending.difference(range))
                .collect();
            resolution.resolved.push(*range);
            #[cfg(feature = "tracing")]
            debug!("Resolved missed range {}: {} new outputs", range, inserted);
        }
        Ok(resolution)
    }

    /// Encode the whole store, obsolete seeds and pending misses included
    pub fn to_bytes(&self) -> FogWalletResult<Vec<u8>> {
        let persisted = PersistedStore {
            outputs: self.outputs.values().cloned().collect(),
            seeds: self.seeds.clone(),
            synced_position: self.synced_position,
            pending_misses: self.pending_misses(),
        };
        let mut bytes = vec![STORE_FORMAT_VERSION];
        persisted
            .serialize(&mut bytes)
            .map_err(SerializationError::from)?;
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> FogWalletResult<Self> {
        let (&version, body) = bytes
            .split_first()
            .ok_or_else(|| SerializationError::Encoding("empty store encoding".to_string()))?;
        if version != STORE_FORMAT_VERSION {
            return Err(SerializationError::UnsupportedStoreVersion(version).into());
        }
        let persisted = PersistedStore::try_from_slice(body).map_err(SerializationError::from)?;

        let mut store = Self {
            seeds: persisted.seeds,
            synced_position: persisted.synced_position,
            ..Self::default()
        };
        for output in persisted.outputs {
            let public_key = *output.public_key();
            if !store.insert_output(output) {
                return Err(SerializationError::Encoding(format!(
                    "duplicate output {public_key}"
                ))
                .into());
            }
        }
        for range in persisted.pending_misses {
            let range = BlockRange::new(range.start(), range.end()).map_err(|_| {
                SerializationError::Encoding(format!("invalid pending range {range}"))
            })?;
            store.pending_misses.insert(range);
        }
        Ok(store)
    }

    fn insert_output(&mut self, output: OwnedOutput) -> bool {
        match self.outputs.entry(*output.public_key()) {
            Entry::Vacant(slot) => {
                slot.insert(output);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Validate a reply and decrypt its results without mutating the store
    fn plan_round(
        &self,
        batches: &[SeedBatch],
        response: QueryResponse,
        ctx: &SyncContext<'_>,
    ) -> FogWalletResult<RoundUpdate> {
        let tip_position = response.tip_position;

        let mut slots: HashMap<SearchKey, (usize, usize)> = HashMap::new();
        for (b, batch) in batches.iter().enumerate() {
            for (i, key) in batch.keys.iter().enumerate() {
                slots.insert(*key, (b, i));
            }
        }
        let mut outcomes: Vec<Vec<Option<KeyOutcome>>> = batches
            .iter()
            .map(|batch| batch.keys.iter().map(|_| None).collect())
            .collect();

        for result in response.search_results {
            let key = result.search_key;
            let Some(&(b, i)) = slots.get(&key) else {
                return Err(invalid_response(format!(
                    "result for unrequested search key {key}"
                )));
            };
            let outcome = match result.status {
                SearchResultStatus::NotFound => KeyOutcome::NotFound,
                SearchResultStatus::Found { ciphertext } => KeyOutcome::Found(ciphertext),
                SearchResultStatus::BadSearchKey => {
                    return Err(invalid_response(format!(
                        "server rejected search key {key}"
                    )));
                }
                SearchResultStatus::InternalError => {
                    return Err(invalid_response(format!(
                        "server internal error for search key {key}"
                    )));
                }
            };
            if outcomes[b][i].replace(outcome).is_some() {
                return Err(invalid_response(format!(
                    "duplicate result for search key {key}"
                )));
            }
        }

        let mut update = RoundUpdate {
            tip_position,
            keys_requested: slots.len(),
            progress: Vec::with_capacity(batches.len()),
            outputs: Vec::new(),
            decryption_failures: 0,
            new_seeds: Vec::new(),
            exhausted_invocation_ids: response.exhausted_invocation_ids,
            misses: response.missed_block_ranges,
        };

        for (batch, results) in batches.iter().zip(outcomes) {
            let mut progress = SeedProgress {
                invocation_id: batch.invocation_id,
                keys_consumed: 0,
                caught_up: false,
                batch_filled: false,
                highest_found: None,
            };
            // keys are consumed in order; the first gap ends the seed's round
            for result in results {
                match result {
                    Some(KeyOutcome::Found(ciphertext)) => {
                        progress.keys_consumed += 1;
                        match ctx.crypto_box.decrypt(ctx.view_key, &ciphertext) {
                            Ok(plaintext) => {
                                let output = OwnedOutput::from_plaintext(&plaintext)?;
                                let position = output.received_position();
                                if position >= tip_position {
                                    return Err(invalid_response(format!(
                                        "output {} at position {position} is beyond tip {tip_position}",
                                        output.public_key()
                                    )));
                                }
                                progress.highest_found = Some(
                                    progress
                                        .highest_found
                                        .map_or(position, |highest| highest.max(position)),
                                );
                                update.outputs.push(output);
                            }
                            Err(_e) => {
                                #[cfg(feature = "tracing")]
                                warn!(
                                    "Search result for invocation {} did not decrypt: {}",
                                    batch.invocation_id, _e
                                );
                                update.decryption_failures += 1;
                            }
                        }
                    }
                    Some(KeyOutcome::NotFound) => {
                        progress.caught_up = true;
                        break;
                    }
                    None => break,
                }
            }
            progress.batch_filled = progress.keys_consumed == batch.keys.len() as u64;
            update.progress.push(progress);
        }

        for record in response.new_seed_records {
            if !self.seeds.accepts(record.invocation_id)
                || update
                    .new_seeds
                    .iter()
                    .any(|seed| seed.invocation_id() == record.invocation_id)
            {
                continue;
            }
            let seed = Seed::from_record(ctx.view_key, &record).map_err(|e| {
                invalid_response(format!(
                    "malformed seed record for invocation {}: {e}",
                    record.invocation_id
                ))
            })?;
            update.new_seeds.push(seed);
        }

        Ok(update)
    }

    /// Commit a validated round
    fn apply_round(&mut self, update: RoundUpdate) -> RoundSummary {
        let mut summary = RoundSummary {
            keys_requested: update.keys_requested,
            decryption_failures: update.decryption_failures,
            ..RoundSummary::default()
        };

        for output in update.outputs {
            if self.insert_output(output) {
                summary.new_outputs += 1;
            }
        }

        for progress in &update.progress {
            if self.seeds.apply_progress(progress, update.tip_position) {
                #[cfg(feature = "tracing")]
                info!(
                    "Seed for invocation {} exhausted its counter",
                    progress.invocation_id
                );
                summary.obsoleted_seeds += 1;
            }
        }

        for seed in update.new_seeds {
            let _invocation_id = seed.invocation_id();
            match self.seeds.insert(seed) {
                SeedInsert::Added | SeedInsert::Superseded => {
                    #[cfg(feature = "tracing")]
                    info!("New seed for invocation {}", _invocation_id);
                    summary.new_seeds += 1;
                }
                SeedInsert::Ignored => {}
            }
        }

        for invocation_id in update.exhausted_invocation_ids {
            if self.seeds.mark_obsolete(invocation_id) {
                #[cfg(feature = "tracing")]
                info!("Invocation {} reported exhausted", invocation_id);
                summary.obsoleted_seeds += 1;
            }
        }

        for range in update.misses {
            if self.pending_misses.insert(range) {
                #[cfg(feature = "tracing")]
                warn!("Server reported missed range {}", range);
                summary.new_misses += 1;
            }
        }

        self.advance_watermark(update.tip_position);
        summary.synced_position = self.synced_position;
        summary.needs_another_round = summary.new_seeds > 0
            || update.progress.iter().any(|progress| {
                progress.batch_filled
                    && self
                        .seeds
                        .get(progress.invocation_id)
                        .is_some_and(|seed| !seed.is_obsolete())
            });
        summary
    }

    /// With no active seed nothing below the tip can still be found
    fn advance_watermark(&mut self, tip_position: u64) {
        let candidate = self
            .seeds
            .min_active_synced_position()
            .map_or(tip_position, |lowest| lowest.min(tip_position));
        if candidate > self.synced_position {
            #[cfg(feature = "tracing")]
            debug!(
                "Watermark advanced {} -> {}",
                self.synced_position, candidate
            );
            self.synced_position = candidate;
        }
    }

    /// Mark outputs whose key images the checker reports on-ledger
    async fn refresh_spent_status(&mut self, ctx: &SyncContext<'_>) -> FogWalletResult<usize> {
        let Some(checker) = ctx.key_image_checker else {
            return Ok(0);
        };
        let owners: HashMap<KeyImage, OutputPublicKey> = self
            .outputs
            .values()
            .filter(|output| !output.is_spent())
            .filter_map(|output| output.key_image().map(|image| (*image, *output.public_key())))
            .collect();
        if owners.is_empty() {
            return Ok(0);
        }
        let mut key_images: Vec<KeyImage> = owners.keys().copied().collect();
        key_images.sort();

        let statuses = checker.check(&key_images).await?;
        ctx.check_cancelled()?;

        let mut spends: Vec<(OutputPublicKey, SpentInfo)> = Vec::new();
        for status in statuses {
            let Some(public_key) = owners.get(&status.key_image) else {
                return Err(invalid_response(format!(
                    "spent status for unrequested key image {}",
                    status.key_image
                )));
            };
            let Some(spent) = status.spent else {
                continue;
            };
            if let Some(output) = self.outputs.get(public_key) {
                if spent.position < output.received_position() {
                    return Err(invalid_response(format!(
                        "output {public_key} spent at {} before it was received at {}",
                        spent.position,
                        output.received_position()
                    )));
                }
            }
            spends.push((*public_key, spent));
        }

        let mut marked = 0;
        for (public_key, spent) in spends {
            if let Some(output) = self.outputs.get_mut(&public_key) {
                if matches!(output.mark_spent(spent.position, spent.time), Ok(true)) {
                    marked += 1;
                }
            }
        }
        #[cfg(feature = "tracing")]
        debug!("Marked {} outputs spent", marked);
        Ok(marked)
    }
}

/// Open every record addressed to the account.
///
/// A record that does not decrypt belongs to someone else and is skipped.
fn trial_decrypt(
    records: &[LedgerRecord],
    range: &BlockRange,
    ctx: &SyncContext<'_>,
) -> FogWalletResult<Vec<OwnedOutput>> {
    #[cfg(feature = "parallel")]
    let opened: Vec<Option<OwnedOutput>> = records
        .par_iter()
        .map(|record| open_record(record, range, ctx))
        .collect::<FogWalletResult<_>>()?;
    #[cfg(not(feature = "parallel"))]
    let opened: Vec<Option<OwnedOutput>> = records
        .iter()
        .map(|record| open_record(record, range, ctx))
        .collect::<FogWalletResult<_>>()?;
    Ok(opened.into_iter().flatten().collect())
}

fn open_record(
    record: &LedgerRecord,
    range: &BlockRange,
    ctx: &SyncContext<'_>,
) -> FogWalletResult<Option<OwnedOutput>> {
    if !range.contains(record.position) {
        return Err(invalid_response(format!(
            "ledger record at {} outside requested range {range}",
            record.position
        )));
    }
    let Ok(plaintext) = ctx.crypto_box.decrypt(ctx.view_key, &record.ciphertext) else {
        return Ok(None);
    };
    let mut payload = OutputPayload::from_bytes(&plaintext)?;
    if payload.public_key != record.public_key {
        return Err(invalid_response(format!(
            "ledger record {} carries payload for {}",
            record.public_key, payload.public_key
        )));
    }
    payload.received_position = record.position;
    payload.received_time = record.time;
    Ok(Some(OwnedOutput::from_payload(payload)))
}

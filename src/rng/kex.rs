//! Key-exchange RNG producing blinded search keys
//!
//! Each output block is
//!
//! ```text
//! Blake2b-512("kex_rng_v1" || len(secret) || secret || len(nonce) || nonce || counter)[..16]
//! ```
//!
//! with all lengths and the counter encoded as little-endian `u64`. The
//! secret is the Diffie-Hellman point between the account view key and the
//! server's per-invocation public key. The server's public key is the nonce.
//! The server computes the same sequence from its side of the exchange, so
//! the byte layout above is a cross-implementation contract.

use blake2::Blake2b512;
use borsh::{BorshDeserialize, BorshSerialize};
use digest::Digest;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{errors::SerializationError, keys::ViewPrivateKey};

/// Output block length in bytes
pub const KEX_RNG_OUTPUT_LEN: usize = 16;
/// Secret length in bytes
pub const KEX_RNG_SECRET_LEN: usize = 32;
/// Current generator version
pub const KEX_RNG_VERSION: u32 = 1;

const KEX_RNG_V1_DOMAIN: &[u8] = b"kex_rng_v1";

/// One search key worth of generator output
pub type KexRngOutput = [u8; KEX_RNG_OUTPUT_LEN];

/// Deterministic generator keyed by a shared secret and a nonce
#[derive(Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Zeroize, ZeroizeOnDrop)]
pub struct KexRng {
    version: u32,
    secret: [u8; KEX_RNG_SECRET_LEN],
    nonce: Vec<u8>,
    counter: u64,
}

impl KexRng {
    /// Construct a current-version generator
    pub fn new(secret: &[u8], nonce: &[u8], counter: u64) -> Result<Self, SerializationError> {
        Self::with_version(KEX_RNG_VERSION, secret, nonce, counter)
    }

    pub fn with_version(
        version: u32,
        secret: &[u8],
        nonce: &[u8],
        counter: u64,
    ) -> Result<Self, SerializationError> {
        if version != KEX_RNG_VERSION {
            return Err(SerializationError::UnsupportedVersion(version));
        }
        let secret: [u8; KEX_RNG_SECRET_LEN] =
            secret
                .try_into()
                .map_err(|_| SerializationError::InvalidKeyLength {
                    expected: KEX_RNG_SECRET_LEN,
                    actual: secret.len(),
                })?;
        Ok(Self {
            version,
            secret,
            nonce: nonce.to_vec(),
            counter,
        })
    }

    /// Client side of the exchange: the secret is `view_key * server_public_key`
    pub fn from_key_exchange(
        view_key: &ViewPrivateKey,
        server_public_key: &[u8],
        version: u32,
        counter: u64,
    ) -> Result<Self, SerializationError> {
        let mut secret = view_key.shared_secret(server_public_key)?;
        let rng = Self::with_version(version, &secret, server_public_key, counter);
        secret.zeroize();
        rng
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// Output for the current counter
    pub fn get_output(&self) -> KexRngOutput {
        self.output_at(self.counter)
    }

    /// Step to the next output
    pub fn advance(&mut self) {
        self.advance_by(1);
    }

    /// Step forward `count` outputs, saturating at the end of the counter space
    pub fn advance_by(&mut self, count: u64) {
        self.counter = self.counter.saturating_add(count);
    }

    /// The next `count` outputs, without moving the counter
    pub fn peek(&self, count: usize) -> Vec<KexRngOutput> {
        (0..count as u64)
            .map_while(|i| self.counter.checked_add(i))
            .map(|counter| self.output_at(counter))
            .collect()
    }

    /// Whether the counter has reached the end of its range
    pub fn is_exhausted(&self) -> bool {
        self.counter == u64::MAX
    }

    fn output_at(&self, counter: u64) -> KexRngOutput {
        let mut hasher = Blake2b512::new();
        hasher.update(KEX_RNG_V1_DOMAIN);
        hasher.update((self.secret.len() as u64).to_le_bytes());
        hasher.update(self.secret);
        hasher.update((self.nonce.len() as u64).to_le_bytes());
        hasher.update(&self.nonce);
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();

        let mut output = [0u8; KEX_RNG_OUTPUT_LEN];
        output.copy_from_slice(&digest[..KEX_RNG_OUTPUT_LEN]);
        output
    }
}

impl fmt::Debug for KexRng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KexRng")
            .field("version", &self.version)
            .field("nonce", &hex::encode(&self.nonce))
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn reference_rng(counter: u64) -> KexRng {
        KexRng::new(&[1u8; 32], &[2u8; 32], counter).unwrap()
    }

    #[test]
    fn test_reference_vectors() {
        let mut rng = reference_rng(0);
        assert_eq!(
            hex::encode(rng.get_output()),
            "d926ba48082124fc09e7dce7fc70cc47"
        );
        rng.advance();
        assert_eq!(
            hex::encode(rng.get_output()),
            "02fb77f2b0143c8f70fe9b6e797320eb"
        );
        rng.advance();
        assert_eq!(
            hex::encode(rng.get_output()),
            "1d14a0ffc5f969b250b7639db27cb80d"
        );

        let rng = reference_rng(1000);
        assert_eq!(
            hex::encode(rng.get_output()),
            "fb4b98ee5f48dd474afb8460a07f3ff9"
        );
    }

    #[test]
    fn test_peek_does_not_advance() {
        let mut rng = reference_rng(5);
        let peeked = rng.peek(3);
        assert_eq!(rng.counter(), 5);
        for expected in peeked {
            assert_eq!(rng.get_output(), expected);
            rng.advance();
        }
        assert_eq!(rng.counter(), 8);
    }

    #[test]
    fn test_starting_counter_equals_advancing() {
        let mut stepped = reference_rng(0);
        stepped.advance_by(42);
        assert_eq!(stepped, reference_rng(42));
        assert_eq!(stepped.get_output(), reference_rng(42).get_output());
    }

    #[test]
    fn test_exhaustion_saturates() {
        let mut rng = reference_rng(u64::MAX - 1);
        assert!(!rng.is_exhausted());
        assert_eq!(rng.peek(4).len(), 2);
        rng.advance_by(10);
        assert!(rng.is_exhausted());
        assert_eq!(rng.counter(), u64::MAX);
    }

    #[test]
    fn test_malformed_inputs() {
        assert_eq!(
            KexRng::new(&[1u8; 31], &[2u8; 32], 0).unwrap_err(),
            SerializationError::InvalidKeyLength {
                expected: 32,
                actual: 31
            }
        );
        assert_eq!(
            KexRng::with_version(7, &[1u8; 32], &[2u8; 32], 0).unwrap_err(),
            SerializationError::UnsupportedVersion(7)
        );
    }

    #[test]
    fn test_key_exchange_matches_server_side() {
        let view_key = ViewPrivateKey::random(&mut OsRng);
        let server_key = ViewPrivateKey::random(&mut OsRng);
        let server_public = server_key.public_key();

        let client = KexRng::from_key_exchange(&view_key, &server_public.0, KEX_RNG_VERSION, 0)
            .unwrap();
        // the server derives the same secret from the account's public view key
        let server_secret = server_key.shared_secret(&view_key.public_key().0).unwrap();
        let server = KexRng::new(&server_secret, &server_public.0, 0).unwrap();

        assert_eq!(client.peek(8), server.peek(8));
    }

    #[test]
    fn test_borsh_round_trip_keeps_counter() {
        let mut rng = reference_rng(0);
        rng.advance_by(17);
        let bytes = borsh::to_vec(&rng).unwrap();
        let restored = KexRng::try_from_slice(&bytes).unwrap();
        assert_eq!(restored, rng);
        assert_eq!(restored.get_output(), rng.get_output());
    }
}

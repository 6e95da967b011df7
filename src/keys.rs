//! Account key material
//!
//! The only key the sync core needs is the account view key: it opens
//! search results and trial-decrypts ledger records, and it is one side of
//! the key exchange that seeds every search-key generator.

use blake2::Blake2b512;
use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT,
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
};
use digest::Digest;
use rand_core::{CryptoRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::SerializationError;

/// Length in bytes of private and public key encodings
pub const KEY_LEN: usize = 32;

/// Domain separator for the per-account persistence key
const STORAGE_KEY_DOMAIN: &[u8] = b"fog_output_store_v1";

/// Private view key of an account
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ViewPrivateKey {
    bytes: [u8; KEY_LEN],
}

impl ViewPrivateKey {
    /// Parse a canonical 32-byte scalar
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        let bytes: [u8; KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| SerializationError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: bytes.len(),
                })?;
        let scalar: Option<Scalar> = Scalar::from_canonical_bytes(bytes).into();
        let scalar = scalar.ok_or(SerializationError::NonCanonicalScalar)?;
        Ok(Self {
            bytes: scalar.to_bytes(),
        })
    }

    /// Generate a fresh random key
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);
        let scalar = Scalar::from_bytes_mod_order_wide(&wide);
        wide.zeroize();
        Self {
            bytes: scalar.to_bytes(),
        }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    pub(crate) fn scalar(&self) -> Scalar {
        Scalar::from_bytes_mod_order(self.bytes)
    }

    pub fn public_key(&self) -> PublicKeyBytes {
        PublicKeyBytes((self.scalar() * RISTRETTO_BASEPOINT_POINT).compress().to_bytes())
    }

    /// Diffie-Hellman with a peer public key, returned in compressed form
    pub fn shared_secret(&self, peer: &[u8]) -> Result<[u8; KEY_LEN], SerializationError> {
        let point = decompress(peer)?;
        Ok((self.scalar() * point).compress().to_bytes())
    }

    /// Storage key under which this account's serialized store is persisted
    pub fn storage_key(&self) -> String {
        let mut hasher = Blake2b512::new();
        hasher.update(STORAGE_KEY_DOMAIN);
        hasher.update(self.public_key().0);
        hex::encode(&hasher.finalize()[..KEY_LEN])
    }
}

impl fmt::Debug for ViewPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ViewPrivateKey(public: {})", self.public_key())
    }
}

/// A compressed Ristretto public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKeyBytes(pub [u8; KEY_LEN]);

impl fmt::Display for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyBytes({self})")
    }
}

pub(crate) fn decompress(bytes: &[u8]) -> Result<RistrettoPoint, SerializationError> {
    if bytes.len() != KEY_LEN {
        return Err(SerializationError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: bytes.len(),
        });
    }
    CompressedRistretto::from_slice(bytes)
        .map_err(|_| SerializationError::InvalidPublicKey)?
        .decompress()
        .ok_or(SerializationError::InvalidPublicKey)
}

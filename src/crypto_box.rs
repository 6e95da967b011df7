//! Versioned crypto box
//!
//! Search results and ledger records carry payloads encrypted to the
//! account view public key. The sync core only needs the [`CryptoBox`]
//! contract; [`VersionedCryptoBox`] is the reference implementation.
//!
//! Ciphertext layout (version 1):
//!
//! ```text
//! version (1) || ephemeral public key (32) || ChaCha20-Poly1305(payload) || tag (16)
//! ```
//!
//! The AEAD key is the first 32 bytes of
//! `Blake2b-512("crypto_box_v1" || ephemeral_secret * view_public)`. A fresh
//! ephemeral key is drawn for every message, so the nonce is fixed at zero.

use blake2::Blake2b512;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use digest::Digest;
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::{
    errors::{DecryptionError, SerializationError},
    keys::{ViewPrivateKey, KEY_LEN},
};

pub const CRYPTO_BOX_VERSION: u8 = 1;

const CRYPTO_BOX_V1_DOMAIN: &[u8] = b"crypto_box_v1";
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + KEY_LEN;

/// Opens ciphertexts addressed to an account
pub trait CryptoBox: Send + Sync {
    fn decrypt(
        &self,
        view_key: &ViewPrivateKey,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, DecryptionError>;
}

/// Reference crypto box: Ristretto key agreement + ChaCha20-Poly1305
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionedCryptoBox;

impl VersionedCryptoBox {
    pub fn new() -> Self {
        Self
    }

    /// Encrypt `plaintext` to the holder of `recipient_public_key`
    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        recipient_public_key: &[u8],
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<Vec<u8>, SerializationError> {
        let ephemeral = ViewPrivateKey::random(rng);
        let mut shared = ephemeral.shared_secret(recipient_public_key)?;
        let cipher = cipher_for(&shared);
        shared.zeroize();

        let sealed = cipher
            .encrypt(Nonce::from_slice(&[0u8; 12]), plaintext)
            .map_err(|e| SerializationError::Encoding(e.to_string()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
        out.push(CRYPTO_BOX_VERSION);
        out.extend_from_slice(&ephemeral.public_key().0);
        out.extend_from_slice(&sealed);
        Ok(out)
    }
}

impl CryptoBox for VersionedCryptoBox {
    fn decrypt(
        &self,
        view_key: &ViewPrivateKey,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, DecryptionError> {
        if ciphertext.len() < HEADER_LEN + TAG_LEN {
            return Err(DecryptionError::Truncated);
        }
        if ciphertext[0] != CRYPTO_BOX_VERSION {
            return Err(DecryptionError::UnsupportedVersion(ciphertext[0]));
        }
        let mut shared = view_key
            .shared_secret(&ciphertext[1..HEADER_LEN])
            .map_err(|_| DecryptionError::InvalidEphemeralKey)?;
        let cipher = cipher_for(&shared);
        shared.zeroize();

        cipher
            .decrypt(Nonce::from_slice(&[0u8; 12]), &ciphertext[HEADER_LEN..])
            .map_err(|_| DecryptionError::AuthenticationFailed)
    }
}

fn cipher_for(shared: &[u8; KEY_LEN]) -> ChaCha20Poly1305 {
    let mut hasher = Blake2b512::new();
    hasher.update(CRYPTO_BOX_V1_DOMAIN);
    hasher.update(shared);
    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize()[..32]);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    key.zeroize();
    cipher
}

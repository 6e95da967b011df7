//! Seekable ChaCha20 random number generator
//!
//! Output is the raw ChaCha20 keystream (20 rounds, 64-bit block counter,
//! stream id 0) keyed by the 32-byte seed and consumed one 32-bit
//! little-endian word at a time, exactly as `rand_chacha`'s `ChaCha20Rng`
//! produces it. Other client implementations reproduce this stream, so
//! transaction values derived from it agree across platforms.
//!
//! Seeking sets the block counter directly, so [`SeekableRng::set_word_pos`]
//! costs the same for any distance.

use rand_chacha::ChaCha20Rng;
use rand_core::{CryptoRng, RngCore, SeedableRng};
use std::fmt;

use crate::errors::SerializationError;

/// Seed length in bytes
pub const SEED_LEN: usize = 32;

/// Deterministic, seekable stream-cipher RNG
#[derive(Clone)]
pub struct SeekableRng {
    inner: ChaCha20Rng,
}

impl SeekableRng {
    /// Construct from a 32-byte seed, positioned at word 0
    pub fn new(seed: &[u8]) -> Result<Self, SerializationError> {
        let seed: [u8; SEED_LEN] =
            seed.try_into()
                .map_err(|_| SerializationError::InvalidKeyLength {
                    expected: SEED_LEN,
                    actual: seed.len(),
                })?;
        Ok(Self::from_seed(seed))
    }

    pub fn from_seed(seed: [u8; SEED_LEN]) -> Self {
        Self {
            inner: ChaCha20Rng::from_seed(seed),
        }
    }

    /// Construct from operating system entropy
    pub fn from_entropy() -> Self {
        Self {
            inner: ChaCha20Rng::from_entropy(),
        }
    }

    pub fn seed(&self) -> [u8; SEED_LEN] {
        self.inner.get_seed()
    }

    /// Number of 32-bit words consumed so far
    pub fn word_pos(&self) -> u128 {
        self.inner.get_word_pos()
    }

    /// Jump to an absolute word position (taken modulo 2^68)
    pub fn set_word_pos(&mut self, word_pos: u128) {
        self.inner.set_word_pos(word_pos);
    }

    pub fn next_int(&mut self) -> i32 {
        self.inner.next_u32() as i32
    }

    pub fn next_long(&mut self) -> i64 {
        self.inner.next_u64() as i64
    }

    /// Produce `len` bytes. A trailing partial word is consumed whole.
    pub fn next_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.inner.fill_bytes(&mut buf);
        buf
    }
}

impl RngCore for SeekableRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

impl CryptoRng for SeekableRng {}

impl fmt::Debug for SeekableRng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeekableRng")
            .field("word_pos", &self.word_pos())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn counting_seed() -> [u8; 32] {
        let mut seed = [0u8; 32];
        for (i, b) in seed.iter_mut().enumerate() {
            *b = i as u8;
        }
        seed
    }

    #[test]
    fn test_zero_seed_reference_vector() {
        let mut rng = SeekableRng::from_seed([0u8; 32]);
        let expected = [
            0xade0b876, 0x903df1a0, 0xe56a5d40, 0x28bd8653, 0xb819d2bd, 0x1aed8da0, 0xccef36a8,
            0xc70d778b,
        ];
        for word in expected {
            assert_eq!(rng.next_u32(), word);
        }
        assert_eq!(rng.word_pos(), 8);
    }

    #[test]
    fn test_zero_seed_second_block() {
        let mut rng = SeekableRng::from_seed([0u8; 32]);
        rng.set_word_pos(16);
        assert_eq!(rng.next_u32(), 0xbee7079f);
        assert_eq!(rng.next_u32(), 0x7a385155);
        assert_eq!(rng.next_u32(), 0x7c97ba98);
        assert_eq!(rng.next_u32(), 0x0d082d73);
    }

    #[test]
    fn test_counting_seed_reference_vectors() {
        let mut rng = SeekableRng::from_seed(counting_seed());
        assert_eq!(rng.next_u64(), 0x6a19c5d97d2bfd39);

        let mut rng = SeekableRng::from_seed(counting_seed());
        assert_eq!(hex::encode(rng.next_bytes(10)), "39fd2b7dd9c5196a8dbd");
        // 10 bytes consume three whole words
        assert_eq!(rng.word_pos(), 3);
        assert_eq!(rng.next_u32(), 0x494adcb8);

        rng.set_word_pos(100);
        assert_eq!(rng.next_u32(), 0x55b54fc9);
        assert_eq!(rng.next_u32(), 0xa487eea0);

        rng.set_word_pos(1 << 40);
        assert_eq!(rng.next_u32(), 0x0faebdd4);
        assert_eq!(rng.next_u32(), 0xcc3d492b);
    }

    #[test]
    fn test_same_seed_same_stream() {
        let seed = SeekableRng::from_entropy().seed();
        let mut a = SeekableRng::from_seed(seed);
        let mut b = SeekableRng::new(&seed).unwrap();
        for len in [0usize, 1, 3, 4, 7, 64, 129] {
            assert_eq!(a.next_bytes(len), b.next_bytes(len));
        }
        assert_eq!(a.word_pos(), b.word_pos());
    }

    #[test]
    fn test_seek_matches_discarding() {
        let seed = SeekableRng::from_entropy().seed();
        for skip in [0u128, 1, 15, 16, 17, 1000] {
            let mut sequential = SeekableRng::from_seed(seed);
            for _ in 0..skip {
                sequential.next_u32();
            }
            let mut seeked = SeekableRng::from_seed(seed);
            seeked.set_word_pos(skip);
            for _ in 0..20 {
                assert_eq!(sequential.next_u32(), seeked.next_u32());
            }
        }
    }

    #[test]
    fn test_seek_backwards() {
        let mut rng = SeekableRng::from_seed(counting_seed());
        let first: Vec<u32> = (0..5).map(|_| rng.next_u32()).collect();
        rng.set_word_pos(0);
        let again: Vec<u32> = (0..5).map(|_| rng.next_u32()).collect();
        assert_eq!(first, again);
    }

    #[test]
    fn test_clone_preserves_position() {
        let mut rng = SeekableRng::from_seed(counting_seed());
        rng.next_bytes(37);
        let mut cloned = rng.clone();
        assert_eq!(rng.next_u64(), cloned.next_u64());
    }

    #[test]
    fn test_distinct_seeds_do_not_collide() {
        let mut a = SeekableRng::from_entropy();
        let mut b = SeekableRng::from_entropy();
        let from_a: HashSet<i32> = (0..10_000).map(|_| a.next_int()).collect();
        let collisions = (0..10_000).filter(|_| from_a.contains(&b.next_int())).count();
        // expected ~0.023 collisions for 10^4 x 10^4 draws from 2^32
        assert!(collisions <= 2, "unexpected collisions: {collisions}");
    }

    #[test]
    fn test_rejects_short_seed() {
        let err = SeekableRng::new(&[0u8; 16]).unwrap_err();
        assert_eq!(
            err,
            SerializationError::InvalidKeyLength {
                expected: 32,
                actual: 16
            }
        );
    }
}

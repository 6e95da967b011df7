//! Deterministic random number generators
//!
//! - [`SeekableRng`]: ChaCha20 keystream RNG with O(1) seeking, used by
//!   transaction construction.
//! - [`KexRng`]: key-exchange keyed generator that yields the sequence of
//!   blinded search keys for one server invocation.
//!
//! Both are reproducible from their inputs and hold mutable position state,
//! so each logical user should own its own instance.

pub mod kex;
pub mod seekable;

pub use kex::*;
pub use seekable::*;

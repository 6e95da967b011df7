//! Wallet libraries for privacy-preserving ledgers with an oblivious index
//!
//! This crate discovers an account's outputs by querying an oblivious
//! index service with pseudorandom search keys, keeps them in an
//! [`OutputStore`] with a monotonic synchronized position, backfills
//! ranges the index missed by trial decryption, and plans transaction
//! inputs and merge transactions over the synced outputs.
//!
//! ## Features
//!
//! - `tracing` (default): structured logging through the `tracing` crate
//! - `parallel`: trial decryption of missed ranges on a rayon thread pool
//! - `storage`: SQLite persistence backend for serialized stores
//!
//! Enable storage in your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! fog_wallet_libs = { version = "0.1", features = ["storage"] }
//! ```
//!
//! Without the `storage` feature, stores can still be persisted through
//! [`storage::InMemoryPersistence`] or any custom
//! [`storage::PersistenceAdapter`].

pub mod crypto_box;
pub mod data_structures;
pub mod errors;
pub mod keys;
pub mod network;
pub mod rng;
pub mod scanning;
pub mod selection;
pub mod storage;

pub use crypto_box::*;
pub use data_structures::*;
pub use errors::*;
pub use keys::*;
pub use scanning::*;
pub use selection::*;

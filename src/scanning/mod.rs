//! Output discovery against an oblivious ledger index
//!
//! The [`OutputStore`] owns an account's outputs, its search-key seeds and
//! the synchronized position. [`OutputStore::refresh`] runs query rounds
//! through the collaborators in [`collaborators`]; missed ranges reported
//! by the server are backfilled with [`OutputStore::resolve_misses`].
//! [`SharedOutputStore`] wraps a store for concurrent readers.

pub mod cancellation;
pub mod collaborators;
pub mod config;
pub mod mocks;
pub mod output_store;
pub mod protocol;
pub mod scan_results;
pub mod seed;
pub mod shared_store;
pub mod snapshot;

pub use cancellation::*;
pub use collaborators::*;
pub use config::*;
pub use output_store::*;
pub use protocol::*;
pub use scan_results::*;
pub use seed::*;
pub use shared_store::*;
pub use snapshot::*;

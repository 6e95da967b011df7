//! Persistence for serialized output stores
//!
//! [`PersistenceAdapter`] is a plain key-value interface. The in-memory
//! backend is always available; the SQLite backend needs the `storage`
//! feature.

#[cfg(feature = "storage")]
pub mod sqlite;
pub mod storage_trait;
pub mod store_persistence;

#[cfg(feature = "storage")]
pub use sqlite::*;
pub use storage_trait::*;
pub use store_persistence::*;

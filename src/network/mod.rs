//! Resilience helpers for talking to remote collaborators
//!
//! None of these are used by the sync core directly; they wrap the
//! transport a caller plugs in behind [`crate::scanning::QueryService`].

pub mod endpoint;
pub mod retry;
pub mod tip_cache;

pub use endpoint::*;
pub use retry::*;
pub use tip_cache::*;

//! Core data types shared by the sync engine and coin selection

pub mod block_range;
pub mod owned_output;

pub use block_range::*;
pub use owned_output::*;

//! Coin selection and defragmentation
//!
//! Pure functions over a snapshot of unspent outputs. Nothing here touches
//! the output store, so a snapshot can be shared freely between threads.

pub mod defragmentation;
pub mod input_selector;

pub use defragmentation::*;
pub use input_selector::*;

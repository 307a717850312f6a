//! Core primitives.
//!
//! Randomness and hashing shared by the game and network layers.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::DrawRng;
pub use hash::{StateHash, StateHasher};

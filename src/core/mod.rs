//! Core deterministic primitives.
//!
//! All types in this module are designed for perfect cross-platform determinism.
//! The server and every client must compute bit-identical turns from them.

pub mod fixed;
pub mod vec2;
pub mod rng;
pub mod hash;

// Re-export core types
pub use fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use vec2::{FixedVec2, Heading};
pub use rng::DeterministicRng;
pub use hash::{StateHash, StateHasher};

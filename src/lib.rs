//! # Hover Race Server
//!
//! Deterministic rollback-and-resimulation core for a multiplayer hover-ship
//! racing game, plus the WebSocket glue that keeps participants in sync.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    HOVER RACE SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── fixed.rs    - Q16.16 fixed-point and physics constants  │
//! │  ├── vec2.rs     - 2D vector, quarter-turn heading           │
//! │  ├── rng.rs      - Seeded PRNG (ship colours)                │
//! │  └── hash.rs     - Turn hashing for desync detection         │
//! │                                                              │
//! │  game/           - Race logic (deterministic)                │
//! │  ├── track.rs    - Grid track and checkpoints                │
//! │  ├── ship.rs     - Ship state and laps                       │
//! │  ├── physics.rs  - Rigid bodies, reset every turn            │
//! │  ├── turn.rs     - One tick of state plus its event log      │
//! │  ├── evolve.rs   - Turn-to-turn step                         │
//! │  └── rollback.rs - History, resimulation, slots, bootstrap   │
//! │                                                              │
//! │  network/        - Transport (non-deterministic)             │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - Message types                             │
//! │  └── session.rs  - Server and client sessions                │
//! │                                                              │
//! │  config.rs       - Environment configuration                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are **100% deterministic**:
//! - No floating-point arithmetic in game logic
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies; the clock is always passed in
//! - The physics world is rebuilt from the prior turn on every step
//!
//! Given the same oldest turn and the same logs, the server and every
//! client compute **identical turns**, whatever order the events arrived in.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod config;

// Re-export commonly used types
pub use core::fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use core::vec2::{FixedVec2, Heading};
pub use game::rollback::{Authority, Game, GameError};
pub use game::state::{ParticipantId, RaceConfig, RacePhase, Slot};
pub use game::track::Track;
pub use game::turn::Turn;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;

/// One simulation step in microseconds (1/60 s, rounded)
pub const TICK_US: i64 = 16_667;

/// Server history window in turns: ceil(500 ms / step)
pub const TURN_MAX_DELAY: u32 = 30;

/// Client history window in turns
pub const CLIENT_RETENTION: u32 = 60;

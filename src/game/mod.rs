//! Game Logic Module
//!
//! All simulation code. 100% deterministic: the same prior turn and log
//! always evolve into the same next turn, on every machine.
//!
//! ## Module Structure
//!
//! - `state`: Slots, participants, race phase, race rules
//! - `input`: Player input bitset and discrete input events
//! - `events`: Server events and per-turn event logs
//! - `ship`: Ship state and lap bookkeeping
//! - `track`: Grid track, checkpoints, spawn positions
//! - `physics`: Fixed-point rigid-body world reset every turn
//! - `turn`: One tick of resolved state plus its log
//! - `evolve`: Pure turn-to-turn step
//! - `rollback`: Turn history, late-event resimulation, slots, bootstrap

pub mod state;
pub mod input;
pub mod events;
pub mod ship;
pub mod track;
pub mod physics;
pub mod turn;
pub mod evolve;
pub mod rollback;

// Re-export key types
pub use state::{ParticipantId, RaceConfig, RacePhase, Slot};
pub use input::{PlayerEvent, PlayerEventKind, PlayerInput};
pub use events::{ServerEvent, TurnLog};
pub use ship::{LapProgress, Ship};
pub use track::{Cell, Track, TrackError};
pub use physics::PhysicsContext;
pub use turn::{Standing, Turn};
pub use evolve::evolve;
pub use rollback::{
    Authority, Bootstrap, BootstrapTurn, EventOutcome, Game, GameError, JoinOutcome,
};

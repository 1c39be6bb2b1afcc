//! Network Layer
//!
//! WebSocket transport for the rollback race.
//! This layer is **non-deterministic** - all game logic runs through `game/`.

pub mod protocol;
pub mod session;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage};
pub use session::{wall_clock_us, ClientSession, ClockSync, RaceSession, SessionError};
pub use server::{GameServer, GameServerError};

//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Text frames carry JSON, binary frames carry bincode. Both codecs use
//! the same derives, so every enum here is externally tagged.

use serde::{Serialize, Deserialize};

use crate::game::events::ServerEvent;
use crate::game::input::PlayerEvent;
use crate::game::rollback::Bootstrap;
use crate::game::state::Slot;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Ask for a slot in the race.
    #[serde(rename = "game:join")]
    Join {
        /// Display name
        username: String,
    },

    /// Local input events for a turn.
    #[serde(rename = "player:events")]
    PlayerEvents {
        /// Events, in the order they happened
        events: Vec<PlayerEvent>,
        /// Turn the events belong to
        target_turn_index: u32,
    },

    /// Clock probe.
    #[serde(rename = "game:ping")]
    Ping {
        /// Client clock when sent (µs)
        client_time_us: i64,
    },

    /// Client fell behind the retention window and needs a new bootstrap.
    #[serde(rename = "player:lost")]
    PlayerLost,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// History snapshot for a joining or resyncing participant.
    #[serde(rename = "game:bootstrap")]
    Bootstrap(Box<Bootstrap>),

    /// Another participant's events.
    #[serde(rename = "player:events")]
    PlayerEvents {
        /// Origin slot
        slot: Slot,
        /// Events as sent
        events: Vec<PlayerEvent>,
        /// Turn they belong to
        target_turn_index: u32,
    },

    /// Spawn or destroy issued by the server.
    #[serde(rename = "server:event")]
    ServerEvent {
        /// The event
        event: ServerEvent,
        /// Turn it belongs to
        target_turn_index: u32,
    },

    /// Answer to a clock probe.
    #[serde(rename = "game:pong")]
    Pong {
        /// Echo of the probe's client clock (µs)
        client_time_us: i64,
        /// Server clock when answered (µs)
        server_now_us: i64,
    },

    /// Request could not be served.
    #[serde(rename = "game:error")]
    Error {
        /// Human-readable reason
        message: String,
    },
}

impl ServerMessage {
    /// Shorthand for an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { message: message.into() }
    }
}

// =============================================================================
// SERIALIZATION
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

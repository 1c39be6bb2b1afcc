//! Turn Event Logs
//!
//! Server-authoritative lifecycle events and the per-turn log that holds
//! every event waiting to be consumed by the next `evolve`.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::game::input::PlayerEvent;
use crate::game::state::Slot;

// =============================================================================
// SERVER EVENTS
// =============================================================================

/// Lifecycle event created only by the authoritative server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Put a new ship on the grid.
    #[serde(rename = "SPAWN_PLAYER")]
    SpawnPlayer {
        /// Slot the ship occupies
        slot: Slot,
        /// Display name
        username: String,
        /// 24-bit RGB colour
        color: u32,
        /// Bots never hold up the finish countdown
        bot: bool,
    },

    /// Remove a ship from the grid.
    #[serde(rename = "DESTROY_PLAYER")]
    DestroyPlayer {
        /// Slot being vacated
        slot: Slot,
    },
}

impl ServerEvent {
    /// Create a spawn event.
    pub fn spawn(slot: Slot, username: impl Into<String>, color: u32, bot: bool) -> Self {
        ServerEvent::SpawnPlayer {
            slot,
            username: username.into(),
            color,
            bot,
        }
    }

    /// Create a destroy event.
    pub fn destroy(slot: Slot) -> Self {
        ServerEvent::DestroyPlayer { slot }
    }

    /// Slot the event refers to.
    pub fn slot(&self) -> Slot {
        match self {
            ServerEvent::SpawnPlayer { slot, .. } => *slot,
            ServerEvent::DestroyPlayer { slot } => *slot,
        }
    }
}

// =============================================================================
// TURN LOG
// =============================================================================

/// Events stored on a turn, consumed to produce the following turn.
///
/// Player events are keyed by slot in a BTreeMap so that iteration order
/// never depends on arrival order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnLog {
    /// Pending intent changes per slot
    pub events: BTreeMap<Slot, Vec<PlayerEvent>>,
    /// Pending lifecycle events, in arrival order
    pub server_events: Vec<ServerEvent>,
}

impl TurnLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Nothing pending.
    pub fn is_empty(&self) -> bool {
        self.events.values().all(Vec::is_empty) && self.server_events.is_empty()
    }

    /// Merge player events with last-writer-wins per event kind.
    ///
    /// Returns whether the log changed. Re-delivering an event already
    /// pending with the same value is a no-op.
    pub fn add_events(&mut self, slot: Slot, events: &[PlayerEvent]) -> bool {
        if events.is_empty() {
            return false;
        }

        let pending = self.events.entry(slot).or_default();
        let before = pending.clone();

        for event in events {
            match pending.iter_mut().find(|e| e.kind() == event.kind()) {
                Some(existing) => *existing = *event,
                None => pending.push(*event),
            }
        }

        // A batch may set a kind twice; only the final log matters
        *pending != before
    }

    /// Append a server event. Server events are never merged or replaced.
    pub fn add_server_event(&mut self, event: ServerEvent) -> bool {
        self.server_events.push(event);
        true
    }

    /// Events pending for a slot.
    pub fn events_for(&self, slot: Slot) -> &[PlayerEvent] {
        self.events.get(&slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Slots claimed by pending spawns.
    pub fn reserved_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.server_events.iter().filter_map(|e| match e {
            ServerEvent::SpawnPlayer { slot, .. } => Some(*slot),
            ServerEvent::DestroyPlayer { .. } => None,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! Player Input and Intent Events
//!
//! A ship's control state is a packed set of six flags. Each tick the new
//! state is folded from the previous one plus that tick's intent events:
//!
//! - `TURN_L` / `TURN_R` are impulses: set by an event, cleared every tick.
//! - `LEAN_L` / `LEAN_R` / `GAS` / `BOOST` are held until an event of the
//!   same kind changes them.

use serde::{Serialize, Deserialize};

// =============================================================================
// PLAYER INPUT
// =============================================================================

/// Resolved control state of one ship for one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerInput {
    /// Packed flags:
    /// - Bit 0: turn left (impulse)
    /// - Bit 1: turn right (impulse)
    /// - Bit 2: lean left
    /// - Bit 3: lean right
    /// - Bit 4: gas
    /// - Bit 5: boost
    /// - Bit 6-7: Reserved
    pub flags: u8,
}

impl PlayerInput {
    /// Turn-left impulse bit
    pub const FLAG_TURN_LEFT: u8 = 0x01;
    /// Turn-right impulse bit
    pub const FLAG_TURN_RIGHT: u8 = 0x02;
    /// Lean-left bit
    pub const FLAG_LEAN_LEFT: u8 = 0x04;
    /// Lean-right bit
    pub const FLAG_LEAN_RIGHT: u8 = 0x08;
    /// Gas bit
    pub const FLAG_GAS: u8 = 0x10;
    /// Boost bit
    pub const FLAG_BOOST: u8 = 0x20;

    const IMPULSE_FLAGS: u8 = Self::FLAG_TURN_LEFT | Self::FLAG_TURN_RIGHT;

    /// Neutral input: nothing pressed.
    pub const fn new() -> Self {
        Self { flags: 0 }
    }

    /// Fold a tick's events onto the previous tick's input.
    ///
    /// Impulses from `previous` are dropped first, then events are applied
    /// in order so that a later event of a kind wins over an earlier one.
    pub fn fold(previous: PlayerInput, events: &[PlayerEvent]) -> PlayerInput {
        let mut input = previous.without_impulses();
        for event in events {
            input.apply(event);
        }
        input
    }

    /// Copy with the turn impulses cleared.
    #[inline]
    pub const fn without_impulses(self) -> Self {
        Self { flags: self.flags & !Self::IMPULSE_FLAGS }
    }

    /// Apply a single event.
    pub fn apply(&mut self, event: &PlayerEvent) {
        match *event {
            PlayerEvent::TurnLeft => self.set(Self::FLAG_TURN_LEFT, true),
            PlayerEvent::TurnRight => self.set(Self::FLAG_TURN_RIGHT, true),
            PlayerEvent::LeanLeft(on) => self.set(Self::FLAG_LEAN_LEFT, on),
            PlayerEvent::LeanRight(on) => self.set(Self::FLAG_LEAN_RIGHT, on),
            PlayerEvent::Gas(on) => self.set(Self::FLAG_GAS, on),
            PlayerEvent::Boost(on) => self.set(Self::FLAG_BOOST, on),
        }
    }

    #[inline]
    fn set(&mut self, flag: u8, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    /// Turn-left impulse this tick.
    #[inline]
    pub fn turn_left(&self) -> bool {
        self.flags & Self::FLAG_TURN_LEFT != 0
    }

    /// Turn-right impulse this tick.
    #[inline]
    pub fn turn_right(&self) -> bool {
        self.flags & Self::FLAG_TURN_RIGHT != 0
    }

    /// Lean left held.
    #[inline]
    pub fn lean_left(&self) -> bool {
        self.flags & Self::FLAG_LEAN_LEFT != 0
    }

    /// Lean right held.
    #[inline]
    pub fn lean_right(&self) -> bool {
        self.flags & Self::FLAG_LEAN_RIGHT != 0
    }

    /// Gas held.
    #[inline]
    pub fn gas(&self) -> bool {
        self.flags & Self::FLAG_GAS != 0
    }

    /// Boost held.
    #[inline]
    pub fn boost(&self) -> bool {
        self.flags & Self::FLAG_BOOST != 0
    }

    /// Force boost off (tracks with boost disabled).
    #[inline]
    pub fn disable_boost(&mut self) {
        self.set(Self::FLAG_BOOST, false);
    }

    /// Main thruster multiplier: 0 idle, 1 gas, 2 gas + boost.
    #[inline]
    pub fn thrust_multiplier(&self) -> i32 {
        match (self.gas(), self.boost()) {
            (true, true) => 2,
            (true, false) => 1,
            _ => 0,
        }
    }

    /// Nothing pressed.
    #[inline]
    pub fn is_neutral(&self) -> bool {
        self.flags == 0
    }
}

// =============================================================================
// PLAYER EVENTS
// =============================================================================

/// One change of a player's intent, targeted at a turn index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerEvent {
    /// Snap the heading 90° counter-clockwise.
    #[serde(rename = "TURN_L")]
    TurnLeft,
    /// Snap the heading 90° clockwise.
    #[serde(rename = "TURN_R")]
    TurnRight,
    /// Start or stop leaning left.
    #[serde(rename = "LEAN_L")]
    LeanLeft(bool),
    /// Start or stop leaning right.
    #[serde(rename = "LEAN_R")]
    LeanRight(bool),
    /// Press or release the gas.
    #[serde(rename = "GAS")]
    Gas(bool),
    /// Press or release the boost.
    #[serde(rename = "BOOST")]
    Boost(bool),
}

/// Kind of a [`PlayerEvent`], the key for last-writer-wins merging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlayerEventKind {
    /// `TURN_L`
    TurnLeft,
    /// `TURN_R`
    TurnRight,
    /// `LEAN_L`
    LeanLeft,
    /// `LEAN_R`
    LeanRight,
    /// `GAS`
    Gas,
    /// `BOOST`
    Boost,
}

impl PlayerEvent {
    /// The event's kind.
    pub fn kind(&self) -> PlayerEventKind {
        match self {
            PlayerEvent::TurnLeft => PlayerEventKind::TurnLeft,
            PlayerEvent::TurnRight => PlayerEventKind::TurnRight,
            PlayerEvent::LeanLeft(_) => PlayerEventKind::LeanLeft,
            PlayerEvent::LeanRight(_) => PlayerEventKind::LeanRight,
            PlayerEvent::Gas(_) => PlayerEventKind::Gas,
            PlayerEvent::Boost(_) => PlayerEventKind::Boost,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! Game: Turn History and Rollback
//!
//! Owns the bounded window of turns, merges late events into past turns
//! and resimulates every turn after the insertion point.
//!
//! ```text
//!  retention_floor                turn_index
//!        │                            │
//!        ▼                            ▼
//!      ┌────┬────┬────┬─────┬────┬────┬────┬────┐
//!      │ T0 │ T1 │ T2 │ ... │ Tk │ Tn │ P  │ P  │   P = placeholder
//!      └────┴────┴────┴─────┴────┴────┴────┴────┘       (log only)
//!                              ▲
//!               late event ────┘  resimulate k+1 ..= n
//! ```
//!
//! A turn's log is consumed to produce the following turn, so an event
//! targeted at turn `k` changes turns `k + 1` onwards.

use std::collections::{BTreeMap, VecDeque};
use std::mem;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::fixed::{micros_to_fixed, TICK_DURATION};
use crate::core::hash::StateHash;
use crate::core::rng::DeterministicRng;
use crate::game::events::{ServerEvent, TurnLog};
use crate::game::evolve::evolve;
use crate::game::input::PlayerEvent;
use crate::game::physics::PhysicsContext;
use crate::game::state::{ParticipantId, RaceConfig, Slot};
use crate::game::track::Track;
use crate::game::turn::Turn;
use crate::{CLIENT_RETENTION, TICK_US, TURN_MAX_DELAY};

// =============================================================================
// ERRORS
// =============================================================================

/// Errors from the turn history.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GameError {
    /// The target turn has already been evicted. The caller must resync
    /// from a fresh bootstrap.
    #[error("turn {target} is below the retention floor {floor}")]
    InvalidTurn {
        /// Requested turn
        target: u32,
        /// Oldest retained turn
        floor: u32,
    },

    /// The target turn is further ahead than the history window allows.
    #[error("turn {target} is too far ahead of current turn {current}")]
    TurnTooFarAhead {
        /// Requested turn
        target: u32,
        /// Current turn
        current: u32,
    },

    /// Slot assignment on a non-authoritative game.
    #[error("only the authoritative game assigns slots")]
    NotAuthoritative,

    /// Participant is already racing.
    #[error("participant already holds slot {0}")]
    AlreadyJoined(Slot),

    /// Every slot is taken.
    #[error("no free slot (max {max} ships)")]
    NoFreeSlot {
        /// Configured ship limit
        max: usize,
    },

    /// Participant has no slot.
    #[error("unknown participant")]
    UnknownParticipant,

    /// Bootstrap payload cannot be replayed.
    #[error("malformed bootstrap: {0}")]
    MalformedBootstrap(String),
}

// =============================================================================
// TYPES
// =============================================================================

/// Which side of the connection a game runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Authority {
    /// Origin of server events; assigns slots.
    Server,
    /// Replays what the server sends.
    Client,
}

impl Authority {
    /// History window for this side. Clients keep about twice the server's
    /// window to absorb one-way latency plus jitter.
    pub fn default_retention(self) -> u32 {
        match self {
            Authority::Server => TURN_MAX_DELAY,
            Authority::Client => CLIENT_RETENTION,
        }
    }
}

/// Whether an event delivery changed history.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// Log changed; later turns were resimulated.
    Changed,
    /// Duplicate or ignored; nothing was recomputed.
    Unchanged,
}

/// A turn inside a bootstrap payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootstrapTurn {
    /// Complete turn (only the oldest one).
    Full(Turn),
    /// Log only; the receiver re-derives the rest.
    EventsOnly(TurnLog),
}

/// Everything a participant needs to rebuild the server's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootstrap {
    /// Index of the first (full) turn
    pub initial_turn_index: u32,
    /// Server's current turn
    pub current_turn_index: u32,
    /// Track being raced
    pub track: Track,
    /// Race rules
    pub config: RaceConfig,
    /// Oldest retained turn in full, then logs up to the newest placeholder
    pub turns: Vec<BootstrapTurn>,
    /// Slot of the receiving participant
    pub assigned_slot: Slot,
    /// Server clock at the current turn (µs)
    pub last_tick_us: i64,
}

/// Result of a successful join.
#[derive(Clone, Debug)]
pub struct JoinOutcome {
    /// Slot assigned to the participant
    pub slot: Slot,
    /// Spawn event to broadcast
    pub event: ServerEvent,
    /// Turn the spawn is targeted at
    pub target_turn_index: u32,
    /// Snapshot for the joiner, already containing the spawn
    pub bootstrap: Bootstrap,
}

// =============================================================================
// GAME
// =============================================================================

/// Simulation driver: history window, rollback and slot bookkeeping.
pub struct Game {
    track: Track,
    config: RaceConfig,
    authority: Authority,
    retention: u32,
    /// `turns[0]` is `retention_floor`; may extend past `turn_index`
    turns: VecDeque<Turn>,
    turn_index: u32,
    retention_floor: u32,
    last_tick_us: i64,
    clock_offset_us: i64,
    slot_owners: BTreeMap<Slot, ParticipantId>,
    physics: PhysicsContext,
    colors: DeterministicRng,
}

impl Game {
    /// Fresh game at turn 0 with the side's default retention.
    pub fn new(track: Track, config: RaceConfig, authority: Authority, now_us: i64) -> Self {
        let physics = PhysicsContext::new(&track);
        let mut turns = VecDeque::new();
        turns.push_back(Turn::initial(&config));

        Self {
            track,
            config,
            authority,
            retention: authority.default_retention(),
            turns,
            turn_index: 0,
            retention_floor: 0,
            last_tick_us: now_us,
            clock_offset_us: 0,
            slot_owners: BTreeMap::new(),
            physics,
            colors: DeterministicRng::new(0),
        }
    }

    /// Builder: override the history window (at least one turn).
    pub fn with_retention(mut self, retention: u32) -> Self {
        self.retention = retention.max(1);
        self
    }

    /// Builder: seed the ship colour generator.
    pub fn with_color_seed(mut self, seed: u64) -> Self {
        self.colors = DeterministicRng::new(seed);
        self
    }

    // ===== ACCESSORS =====

    /// Track being raced.
    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Race rules.
    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    /// Server or client.
    pub fn authority(&self) -> Authority {
        self.authority
    }

    /// History window size.
    pub fn retention(&self) -> u32 {
        self.retention
    }

    /// Current tick.
    pub fn turn_index(&self) -> u32 {
        self.turn_index
    }

    /// Oldest retained tick.
    pub fn retention_floor(&self) -> u32 {
        self.retention_floor
    }

    /// Clock value of the current turn (µs, server time).
    pub fn last_tick_us(&self) -> i64 {
        self.last_tick_us
    }

    /// Estimated server clock minus local clock (µs).
    pub fn clock_offset_us(&self) -> i64 {
        self.clock_offset_us
    }

    /// Update the clock offset estimate.
    pub fn set_clock_offset(&mut self, offset_us: i64) {
        self.clock_offset_us = offset_us;
    }

    /// The current turn.
    pub fn current_turn(&self) -> &Turn {
        &self.turns[self.offset(self.turn_index)]
    }

    /// Hash of the current turn.
    pub fn current_hash(&self) -> StateHash {
        self.current_turn().compute_hash()
    }

    /// A retained turn, including placeholders past the current one.
    pub fn turn(&self, index: u32) -> Option<&Turn> {
        if index < self.retention_floor {
            return None;
        }
        self.turns.get(self.offset(index))
    }

    /// Retained turns with their indices, oldest first.
    pub fn history(&self) -> impl Iterator<Item = (u32, &Turn)> + '_ {
        self.turns
            .iter()
            .enumerate()
            .map(move |(i, t)| (self.retention_floor + i as u32, t))
    }

    /// Slot held by a participant.
    pub fn slot_of(&self, participant: ParticipantId) -> Option<Slot> {
        self.slot_owners
            .iter()
            .find(|(_, p)| **p == participant)
            .map(|(slot, _)| *slot)
    }

    /// Participant holding a slot.
    pub fn owner_of(&self, slot: Slot) -> Option<ParticipantId> {
        self.slot_owners.get(&slot).copied()
    }

    #[inline]
    fn offset(&self, index: u32) -> usize {
        (index - self.retention_floor) as usize
    }

    // ===== EVENT INGESTION =====

    fn check_target(&self, target: u32) -> Result<(), GameError> {
        if target < self.retention_floor {
            return Err(GameError::InvalidTurn {
                target,
                floor: self.retention_floor,
            });
        }
        if target > self.turn_index.saturating_add(self.retention) {
            return Err(GameError::TurnTooFarAhead {
                target,
                current: self.turn_index,
            });
        }
        Ok(())
    }

    /// Turn at `index`, creating placeholders up to it. Caller checks the
    /// target first.
    fn turn_entry(&mut self, index: u32) -> &mut Turn {
        let offset = self.offset(index);
        while self.turns.len() <= offset {
            self.turns.push_back(Turn::default());
        }
        &mut self.turns[offset]
    }

    /// Merge a slot's events into turn `target`.
    ///
    /// Re-delivery of events already pending is `Unchanged` and costs
    /// nothing. A changed log in the past resimulates from `target`.
    pub fn on_player_events(
        &mut self,
        slot: Slot,
        events: &[PlayerEvent],
        target: u32,
    ) -> Result<EventOutcome, GameError> {
        self.check_target(target)?;

        if !self.turn_entry(target).add_events(slot, events) {
            return Ok(EventOutcome::Unchanged);
        }

        if target < self.turn_index {
            debug!(slot, target, current = self.turn_index, "rollback for late player events");
        }
        self.resimulate_from(target);
        Ok(EventOutcome::Changed)
    }

    /// Append a server event at turn `target`.
    ///
    /// The authoritative game is the origin of server events and ignores
    /// inbound ones.
    pub fn on_server_event(&mut self, event: ServerEvent, target: u32) -> Result<EventOutcome, GameError> {
        if self.authority == Authority::Server {
            debug!(?event, target, "ignoring inbound server event on authoritative game");
            return Ok(EventOutcome::Unchanged);
        }
        self.check_target(target)?;
        self.push_server_event(event, target);
        Ok(EventOutcome::Changed)
    }

    fn push_server_event(&mut self, event: ServerEvent, target: u32) {
        self.turn_entry(target).add_server_event(event);
        self.resimulate_from(target);
    }

    /// Recompute turns `from + 1 ..= turn_index`, each from its predecessor,
    /// keeping the logs already stored on them.
    pub fn resimulate_from(&mut self, from: u32) {
        let start = from.max(self.retention_floor);
        for k in start..self.turn_index {
            let offset = self.offset(k);
            let next = evolve(
                &self.turns[offset],
                &self.track,
                &self.config,
                &mut self.physics,
                TICK_DURATION,
            );

            let stored = &mut self.turns[offset + 1];
            let log = mem::take(&mut stored.log);
            *stored = Turn { log, ..next };

            #[cfg(feature = "debug-tracing")]
            tracing::trace!(
                turn = k + 1,
                hash = %crate::core::hash::short_hex(&stored.compute_hash()),
                "resimulated turn"
            );
        }
    }

    // ===== CLOCK =====

    /// Advance as many whole ticks as the clock allows and return the
    /// current turn.
    pub fn tick(&mut self, now_us: i64) -> &Turn {
        while now_us + self.clock_offset_us - self.last_tick_us >= TICK_US {
            self.last_tick_us += TICK_US;
            self.advance();
        }
        self.current_turn()
    }

    /// Advance exactly one turn regardless of the clock.
    pub fn advance(&mut self) {
        self.turn_entry(self.turn_index + 1);
        self.turn_index += 1;
        self.resimulate_from(self.turn_index - 1);

        while self.turn_index - self.retention_floor > self.retention {
            self.turns.pop_front();
            self.retention_floor += 1;
        }
    }

    /// Extrapolate the current turn by the time elapsed since the last
    /// tick, capped below one step. History is untouched; the result is
    /// for rendering only.
    pub fn fake_tick(&mut self, now_us: i64) -> Turn {
        let elapsed = (now_us + self.clock_offset_us - self.last_tick_us).clamp(0, TICK_US - 1);
        let offset = self.offset(self.turn_index);
        evolve(
            &self.turns[offset],
            &self.track,
            &self.config,
            &mut self.physics,
            micros_to_fixed(elapsed),
        )
    }

    // ===== SLOTS =====

    /// Give a participant a slot and spawn their ship at the current turn.
    pub fn join(
        &mut self,
        participant: ParticipantId,
        username: impl Into<String>,
        bot: bool,
    ) -> Result<JoinOutcome, GameError> {
        if self.authority != Authority::Server {
            return Err(GameError::NotAuthoritative);
        }
        if let Some(slot) = self.slot_of(participant) {
            return Err(GameError::AlreadyJoined(slot));
        }

        let slot = self.current_turn().free_slot();
        if slot >= self.config.max_ships {
            return Err(GameError::NoFreeSlot { max: self.config.max_ships });
        }

        let target = self.turn_index;
        let event = ServerEvent::spawn(slot, username, self.colors.next_color(), bot);
        self.push_server_event(event.clone(), target);
        self.slot_owners.insert(slot, participant);

        info!(participant = %participant.short(), slot, turn = target, "participant joined");

        Ok(JoinOutcome {
            slot,
            event,
            target_turn_index: target,
            bootstrap: self.bootstrap(slot),
        })
    }

    /// Remove a participant's ship at the current turn.
    ///
    /// Returns the destroy event and its target turn, or `None` when the
    /// participant holds no slot.
    pub fn leave(&mut self, participant: ParticipantId) -> Option<(ServerEvent, u32)> {
        let slot = self.slot_of(participant)?;
        self.slot_owners.remove(&slot);

        let target = self.turn_index;
        let event = ServerEvent::destroy(slot);
        self.push_server_event(event.clone(), target);

        info!(participant = %participant.short(), slot, turn = target, "participant left");
        Some((event, target))
    }

    // ===== BOOTSTRAP =====

    /// Snapshot for a participant: the oldest retained turn in full and
    /// every later log.
    pub fn bootstrap(&self, assigned_slot: Slot) -> Bootstrap {
        let turns = self
            .turns
            .iter()
            .enumerate()
            .map(|(i, turn)| {
                if i == 0 {
                    BootstrapTurn::Full(turn.clone())
                } else {
                    BootstrapTurn::EventsOnly(turn.log.clone())
                }
            })
            .collect();

        Bootstrap {
            initial_turn_index: self.retention_floor,
            current_turn_index: self.turn_index,
            track: self.track.clone(),
            config: self.config.clone(),
            turns,
            assigned_slot,
            last_tick_us: self.last_tick_us,
        }
    }

    /// Rebuild a client game from a bootstrap by replaying forward.
    pub fn from_bootstrap(bootstrap: Bootstrap, clock_offset_us: i64) -> Result<Self, GameError> {
        let Bootstrap {
            initial_turn_index,
            current_turn_index,
            track,
            config,
            turns: entries,
            last_tick_us,
            ..
        } = bootstrap;

        if current_turn_index < initial_turn_index {
            return Err(GameError::MalformedBootstrap(format!(
                "current turn {current_turn_index} precedes initial turn {initial_turn_index}"
            )));
        }
        let needed = (current_turn_index - initial_turn_index) as usize + 1;
        if entries.len() < needed {
            return Err(GameError::MalformedBootstrap(format!(
                "{} turns supplied, {} needed",
                entries.len(),
                needed
            )));
        }

        let mut entries = entries.into_iter();
        let first = match entries.next() {
            Some(BootstrapTurn::Full(turn)) => turn,
            _ => return Err(GameError::MalformedBootstrap("first turn is not full".into())),
        };

        let mut turns = VecDeque::with_capacity(needed);
        turns.push_back(first);
        turns.extend(entries.map(|entry| match entry {
            BootstrapTurn::Full(turn) => Turn::placeholder(turn.log),
            BootstrapTurn::EventsOnly(log) => Turn::placeholder(log),
        }));

        let physics = PhysicsContext::new(&track);
        let mut game = Self {
            track,
            config,
            authority: Authority::Client,
            retention: Authority::Client.default_retention(),
            turns,
            turn_index: current_turn_index,
            retention_floor: initial_turn_index,
            last_tick_us,
            clock_offset_us,
            slot_owners: BTreeMap::new(),
            physics,
            colors: DeterministicRng::new(0),
        };
        game.resimulate_from(initial_turn_index);

        debug!(
            floor = initial_turn_index,
            current = current_turn_index,
            "game rebuilt from bootstrap"
        );
        Ok(game)
    }
}

impl std::fmt::Debug for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("track", &self.track.name())
            .field("authority", &self.authority)
            .field("turn_index", &self.turn_index)
            .field("retention_floor", &self.retention_floor)
            .field("retained", &self.turns.len())
            .field("participants", &self.slot_owners.len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! Turn Container
//!
//! A turn is one tick's resolved state (ships, race phase, counter) plus
//! the event log that will be consumed to produce the *next* turn.

use serde::{Serialize, Deserialize};

use crate::core::fixed::Fixed;
use crate::core::hash::{StateHash, StateHasher};
use crate::game::events::{ServerEvent, TurnLog};
use crate::game::input::PlayerEvent;
use crate::game::ship::Ship;
use crate::game::state::{RaceConfig, RacePhase, Slot};

/// One tick of the race.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Ships by slot; `None` is a free slot
    pub ships: Vec<Option<Ship>>,
    /// Events consumed when evolving this turn into the next
    pub log: TurnLog,
    /// Global race phase
    pub phase: RacePhase,
    /// Ticks left in the current timed phase
    pub counter: u32,
}

/// A ship's place in the race, for result summaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Standing {
    /// Slot of the ship
    pub slot: Slot,
    /// Display name
    pub username: String,
    /// Past the final lap
    pub finished: bool,
    /// Laps completed
    pub lap: i32,
    /// Sum of completed laps
    pub total_time: Fixed,
    /// Fastest completed lap
    pub best_lap: Option<Fixed>,
    /// Bot-controlled
    pub bot: bool,
}

impl Turn {
    /// First turn of a fresh game.
    pub fn initial(config: &RaceConfig) -> Self {
        let (phase, counter) = config.initial_phase();
        Self {
            ships: Vec::new(),
            log: TurnLog::new(),
            phase,
            counter,
        }
    }

    /// Turn holding only a log, for events that arrive before their tick.
    pub fn placeholder(log: TurnLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    /// Ship in a slot.
    pub fn ship(&self, slot: Slot) -> Option<&Ship> {
        self.ships.get(slot).and_then(Option::as_ref)
    }

    /// Occupied slots with their ships, ascending.
    pub fn occupied(&self) -> impl Iterator<Item = (Slot, &Ship)> + '_ {
        self.ships
            .iter()
            .enumerate()
            .filter_map(|(slot, ship)| ship.as_ref().map(|s| (slot, s)))
    }

    /// Number of ships on track.
    pub fn ship_count(&self) -> usize {
        self.occupied().count()
    }

    /// Lowest slot that is neither occupied nor claimed by a spawn still
    /// waiting in this turn's log.
    pub fn free_slot(&self) -> Slot {
        let reserved: Vec<Slot> = self.log.reserved_slots().collect();
        (0..)
            .find(|slot| self.ship(*slot).is_none() && !reserved.contains(slot))
            .unwrap_or(self.ships.len())
    }

    /// Merge player events into this turn's log. Returns whether the log
    /// changed.
    pub fn add_events(&mut self, slot: Slot, events: &[PlayerEvent]) -> bool {
        self.log.add_events(slot, events)
    }

    /// Append a server event to this turn's log.
    pub fn add_server_event(&mut self, event: ServerEvent) -> bool {
        self.log.add_server_event(event)
    }

    /// SHA-256 over the derived state. The log is excluded: it is input to
    /// the next turn, not part of this one's outcome.
    pub fn compute_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_turn();
        hasher.update_u8(self.phase.tag());
        hasher.update_u32(self.counter);
        hasher.update_u32(self.ship_count() as u32);
        for (slot, ship) in self.occupied() {
            hasher.update_u32(slot as u32);
            ship.hash_into(&mut hasher);
        }
        hasher.finalize()
    }

    /// Finishers first by total time, then everyone else by laps.
    pub fn standings(&self, max_laps: u32) -> Vec<Standing> {
        let mut standings: Vec<Standing> = self
            .occupied()
            .map(|(slot, s)| Standing {
                slot,
                username: s.username.clone(),
                finished: s.has_finished_race(max_laps),
                lap: s.lap,
                total_time: s.total_time(),
                best_lap: s.best_lap(),
                bot: s.bot,
            })
            .collect();

        standings.sort_by(|a, b| {
            b.finished
                .cmp(&a.finished)
                .then_with(|| {
                    if a.finished {
                        a.total_time.cmp(&b.total_time)
                    } else {
                        b.lap.cmp(&a.lap)
                    }
                })
                .then_with(|| a.slot.cmp(&b.slot))
        });
        standings
    }
}

/// Every present, human ship has finished. Bots never hold up the finish.
pub fn all_humans_finished<'a>(ships: impl IntoIterator<Item = &'a Ship>, max_laps: u32) -> bool {
    ships
        .into_iter()
        .all(|s| s.bot || s.has_finished_race(max_laps))
}

// =============================================================================
// TESTS
// =============================================================================

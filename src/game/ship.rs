//! Ship Snapshot
//!
//! One racer's kinematic and race-progress state for a single turn.
//! Ships are plain values: every turn owns its own copies and `evolve`
//! derives fresh ones from the previous turn.

use serde::{Serialize, Deserialize};

use crate::core::fixed::{Fixed, FIXED_SCALE};
use crate::core::hash::StateHasher;
use crate::core::vec2::{FixedVec2, Heading};
use crate::game::input::PlayerInput;

/// Checkpoint a freshly spawned or reset ship starts on.
pub const SPAWN_CHECKPOINT: u8 = 1;

/// Outcome of moving a ship onto a cell's checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LapProgress {
    /// Same checkpoint, one step forward or one step back.
    Unchanged,
    /// Crossed the start line forward.
    LapCompleted,
    /// Crossed the start line forward and went past the last lap.
    Finished,
    /// Crossed the start line backwards.
    LapUndone,
}

/// A racer on the track.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ship {
    /// Centre of the hull
    pub position: FixedVec2,
    /// Units per second
    pub velocity: FixedVec2,
    /// Quarter-turn body angle
    pub angle: Heading,
    /// Display name
    pub username: String,
    /// 24-bit RGB colour
    pub color: u32,
    /// Bot-controlled ships don't hold up the finish countdown
    pub bot: bool,
    /// Input resolved for this turn
    pub input: PlayerInput,
    /// Last checkpoint marker the ship stood on
    pub checkpoint: u8,
    /// Laps completed (can go down on a backwards crossing)
    pub lap: i32,
    /// Bucket in `lap_times` currently accumulating
    pub current_lap_index: usize,
    /// Seconds per lap; bucket 0 is the run-up to the start line
    pub lap_times: Vec<Fixed>,
    /// Sitting in another ship's slipstream (cosmetic only)
    pub is_drafting: bool,
}

impl Ship {
    /// New ship at its spawn position, facing the start.
    pub fn spawn(position: FixedVec2, username: impl Into<String>, color: u32, bot: bool) -> Self {
        Self {
            position,
            velocity: FixedVec2::ZERO,
            angle: Heading::NORTH,
            username: username.into(),
            color,
            bot,
            input: PlayerInput::new(),
            checkpoint: SPAWN_CHECKPOINT,
            lap: 0,
            current_lap_index: 0,
            lap_times: vec![0],
            is_drafting: false,
        }
    }

    /// Past the final lap.
    #[inline]
    pub fn has_finished_race(&self, max_laps: u32) -> bool {
        self.lap > max_laps as i32
    }

    /// Add elapsed time to the running lap unless the race is over for
    /// this ship.
    pub fn accumulate_lap_time(&mut self, dt: Fixed, max_laps: u32) {
        if self.has_finished_race(max_laps) {
            return;
        }
        if let Some(bucket) = self.lap_times.get_mut(self.current_lap_index) {
            *bucket = bucket.saturating_add(dt);
        }
    }

    /// Apply the lap rule for a move onto checkpoint `new`.
    ///
    /// Checkpoints descend along the direction of travel, so a jump up by
    /// more than one is a start-line crossing and a jump down by more
    /// than one is a crossing in reverse.
    pub fn cross_checkpoint(&mut self, new: u8, max_laps: u32) -> LapProgress {
        let old = self.checkpoint as i32;
        let next = new as i32;
        self.checkpoint = new;

        if next > old + 1 {
            let had_finished = self.has_finished_race(max_laps);
            self.lap += 1;

            if self.lap > self.current_lap_index as i32 {
                self.current_lap_index = self.lap as usize;
                self.lap_times.push(0);
            }

            if !had_finished && self.has_finished_race(max_laps) {
                LapProgress::Finished
            } else {
                LapProgress::LapCompleted
            }
        } else if next < old - 1 {
            self.lap -= 1;
            LapProgress::LapUndone
        } else {
            LapProgress::Unchanged
        }
    }

    /// Put the ship back on the grid for a new race.
    pub fn reset_to_spawn(&mut self, position: FixedVec2) {
        self.position = position;
        self.velocity = FixedVec2::ZERO;
        self.angle = Heading::NORTH;
        self.checkpoint = SPAWN_CHECKPOINT;
        self.lap = 0;
        self.current_lap_index = 0;
        self.lap_times = vec![0];
    }

    /// Laps actually raced: bucket 0 and the running lap are excluded.
    pub fn completed_laps(&self) -> &[Fixed] {
        let end = self.current_lap_index.min(self.lap_times.len());
        if end <= 1 {
            &[]
        } else {
            &self.lap_times[1..end]
        }
    }

    /// Sum of completed laps, in seconds.
    pub fn total_time(&self) -> Fixed {
        self.completed_laps()
            .iter()
            .fold(0, |sum: Fixed, t| sum.saturating_add(*t))
    }

    /// Fastest completed lap, in seconds.
    pub fn best_lap(&self) -> Option<Fixed> {
        self.completed_laps().iter().copied().min()
    }

    /// Feed every field into a turn hash.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_vec2(self.position);
        hasher.update_vec2(self.velocity);
        hasher.update_u8(self.angle.quarters());
        hasher.update_str(&self.username);
        hasher.update_u32(self.color);
        hasher.update_bool(self.bot);
        hasher.update_u8(self.input.flags);
        hasher.update_u8(self.checkpoint);
        hasher.update_i32(self.lap);
        hasher.update_u32(self.current_lap_index as u32);
        hasher.update_u32(self.lap_times.len() as u32);
        for t in &self.lap_times {
            hasher.update_fixed(*t);
        }
        hasher.update_bool(self.is_drafting);
    }
}

/// Format seconds as `m:ss.mmm`. Times past ten minutes show `+` for the
/// minutes.
pub fn format_race_time(seconds: Fixed) -> String {
    let millis = ((seconds.max(0) as i64) * 1000) >> FIXED_SCALE;
    let minutes = millis / 60_000;
    let secs = (millis / 1000) % 60;
    let frac = millis % 1000;

    if minutes > 10 {
        format!("+:{:02}.{:03}", secs, frac)
    } else {
        format!("{}:{:02}.{:03}", minutes, secs, frac)
    }
}

// =============================================================================
// TESTS
// =============================================================================

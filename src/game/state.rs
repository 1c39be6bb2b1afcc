//! Race State Definitions
//!
//! Identifiers, the global race phase and the race rules shared by the
//! server and every client.

use serde::{Serialize, Deserialize};

use crate::TICK_RATE;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Index of a racer in a turn's ship list.
///
/// Stable for the lifetime of a racer and independent of the network
/// connection that controls it.
pub type Slot = usize;

/// Network participant identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub [u8; 16]);

impl ParticipantId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Fresh random (v4) identifier for a new connection.
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// First four bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

// =============================================================================
// RACE PHASE
// =============================================================================

/// Global race state machine.
///
/// ```text
/// Countdown ──► InProgress ──► FinishCountdown ──► ResultsScreen
///                   ▲                                   │
///                   └───────────── soft reset ──────────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RacePhase {
    /// Pre-race countdown; ships cannot move.
    #[serde(rename = "gameCountdown")]
    Countdown,
    /// Racing.
    #[default]
    #[serde(rename = "gameInProgress")]
    InProgress,
    /// Someone finished; everyone else has until the counter runs out.
    #[serde(rename = "gameFinishCountdown")]
    FinishCountdown,
    /// Showing results before the next race.
    #[serde(rename = "gameResultsScreen")]
    ResultsScreen,
}

impl RacePhase {
    /// Whether player input moves ships in this phase.
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(self, RacePhase::InProgress | RacePhase::FinishCountdown)
    }

    /// Stable tag for hashing.
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            RacePhase::Countdown => 0,
            RacePhase::InProgress => 1,
            RacePhase::FinishCountdown => 2,
            RacePhase::ResultsScreen => 3,
        }
    }
}

// =============================================================================
// RACE CONFIG
// =============================================================================

/// Rules of a race. Must be identical on the server and every client,
/// which is why it travels inside the bootstrap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceConfig {
    /// Laps to complete; a ship finishes once `lap > max_laps`.
    pub max_laps: u32,
    /// Ticks of `Countdown` before the first race. Zero starts in progress.
    pub start_countdown_ticks: u32,
    /// Ticks of `FinishCountdown` after the first ship finishes.
    pub finish_countdown_ticks: u32,
    /// Ticks of `ResultsScreen` before the soft reset.
    pub results_screen_ticks: u32,
    /// Highest number of ships on track at once.
    pub max_ships: usize,
    /// Replace a finished or idle ship's input with a neutral one. When
    /// false the held flags are kept on the ship for visuals but produce
    /// no force.
    pub suppress_cosmetic_input: bool,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            max_laps: 5,
            start_countdown_ticks: 3 * TICK_RATE,
            finish_countdown_ticks: 15 * TICK_RATE,
            results_screen_ticks: 5 * TICK_RATE,
            max_ships: 16,
            suppress_cosmetic_input: true,
        }
    }
}

impl RaceConfig {
    /// Phase and counter of the very first turn.
    pub fn initial_phase(&self) -> (RacePhase, u32) {
        if self.start_countdown_ticks == 0 {
            (RacePhase::InProgress, 0)
        } else {
            (RacePhase::Countdown, self.start_countdown_ticks)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_tick_rate() {
        let config = RaceConfig::default();
        assert_eq!(config.max_laps, 5);
        assert_eq!(config.finish_countdown_ticks, 900);
        assert_eq!(config.results_screen_ticks, 300);
        assert_eq!(config.initial_phase(), (RacePhase::Countdown, 180));
    }

    #[test]
    fn test_zero_countdown_starts_racing() {
        let config = RaceConfig {
            start_countdown_ticks: 0,
            ..Default::default()
        };
        assert_eq!(config.initial_phase(), (RacePhase::InProgress, 0));
    }

    #[test]
    fn test_active_phases() {
        assert!(!RacePhase::Countdown.is_active());
        assert!(RacePhase::InProgress.is_active());
        assert!(RacePhase::FinishCountdown.is_active());
        assert!(!RacePhase::ResultsScreen.is_active());
    }

    #[test]
    fn test_participant_id_uuid() {
        let id = ParticipantId::random();
        let parsed = uuid::Uuid::parse_str(&id.to_uuid_string()).map(|u| *u.as_bytes());
        assert_eq!(parsed.ok(), Some(id.0));
        assert_eq!(id.short().len(), 8);
    }
}

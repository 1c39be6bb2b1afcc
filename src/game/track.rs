//! Track Grid
//!
//! A track is a grid of square cells, `CELL_EDGE` units wide, centred on
//! multiples of `CELL_EDGE`. Cell `(row, col)` covers
//! `x ∈ [col*10 - 5, col*10 + 5)` and `y ∈ [row*10 - 5, row*10 + 5)`.
//!
//! ## Text format
//!
//! ```text
//! #        wall
//! ' ' .    road
//! 1-9      checkpoint, numbered downwards along the direction of travel
//! ;        slow surface
//! ```
//!
//! The highest checkpoint number on the grid is the start line.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::fixed::{Fixed, cell_index, CELL_EDGE, FIXED_ONE};
use crate::core::vec2::FixedVec2;
use crate::game::state::Slot;

/// Errors building a track from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackError {
    /// No rows, or only empty rows.
    #[error("track grid is empty")]
    Empty,
    /// Grid has no checkpoint to start from.
    #[error("track has no checkpoint markers")]
    NoCheckpoint,
    /// Unknown cell character.
    #[error("invalid cell {ch:?} at row {row}, column {col}")]
    InvalidCell {
        /// Row of the bad cell
        row: usize,
        /// Column of the bad cell
        col: usize,
        /// The character found
        ch: char,
    },
}

/// One grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cell {
    /// Solid; ships bounce off.
    Wall,
    /// Plain road.
    Road,
    /// Extra drag.
    Slow,
    /// Numbered checkpoint marker.
    Checkpoint(u8),
}

impl Cell {
    fn parse(ch: char) -> Option<Self> {
        match ch {
            '#' => Some(Cell::Wall),
            ' ' | '.' => Some(Cell::Road),
            ';' => Some(Cell::Slow),
            '1'..='9' => Some(Cell::Checkpoint(ch as u8 - b'0')),
            _ => None,
        }
    }

    fn to_char(self) -> char {
        match self {
            Cell::Wall => '#',
            Cell::Road => ' ',
            Cell::Slow => ';',
            Cell::Checkpoint(n) => (b'0' + n) as char,
        }
    }
}

/// Serialized form of a track: the text grid plus per-track toggles.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackDef {
    /// Display name
    pub name: String,
    /// One string per row
    pub grid: Vec<String>,
    /// Boost input is ignored on this track
    #[serde(default)]
    pub boost_disabled: bool,
}

/// Read-only race track.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TrackDef", into = "TrackDef")]
pub struct Track {
    name: String,
    rows: Vec<Vec<Cell>>,
    start_checkpoint: u8,
    start_cell: (usize, usize),
    boost_disabled: bool,
}

impl Track {
    /// Parse a track from text rows.
    pub fn from_rows<I, S>(name: impl Into<String>, rows: I) -> Result<Self, TrackError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut grid = Vec::new();
        for (row, line) in rows.into_iter().enumerate() {
            let cells = line
                .as_ref()
                .chars()
                .enumerate()
                .map(|(col, ch)| Cell::parse(ch).ok_or(TrackError::InvalidCell { row, col, ch }))
                .collect::<Result<Vec<_>, _>>()?;
            grid.push(cells);
        }

        if grid.iter().all(Vec::is_empty) {
            return Err(TrackError::Empty);
        }

        let start_checkpoint = grid
            .iter()
            .flatten()
            .filter_map(|c| match c {
                Cell::Checkpoint(n) => Some(*n),
                _ => None,
            })
            .max()
            .ok_or(TrackError::NoCheckpoint)?;

        // First cell in row-major order holding the start marker
        let start_cell = grid
            .iter()
            .enumerate()
            .find_map(|(i, row)| {
                row.iter()
                    .position(|c| *c == Cell::Checkpoint(start_checkpoint))
                    .map(|j| (i, j))
            })
            .ok_or(TrackError::NoCheckpoint)?;

        Ok(Self {
            name: name.into(),
            rows: grid,
            start_checkpoint,
            start_cell,
            boost_disabled: false,
        })
    }

    /// Builder: disable boost on this track.
    pub fn with_boost_disabled(mut self, disabled: bool) -> Self {
        self.boost_disabled = disabled;
        self
    }

    /// The default race track: a one-cell-wide loop with nine checkpoints
    /// and a slow patch on the bottom straight.
    pub fn oval() -> Self {
        const ROWS: [&str; 7] = [
            "##############",
            "#  8  9  1   #",
            "# ##########2#",
            "#7########## #",
            "# ##########3#",
            "#  6 ;;5  4  #",
            "##############",
        ];
        // The layout above is a compile-time constant with a start marker
        match Self::from_rows("oval", ROWS) {
            Ok(track) => track,
            Err(e) => unreachable!("built-in track is invalid: {e}"),
        }
    }

    /// Track name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Boost input is ignored.
    pub fn boost_disabled(&self) -> bool {
        self.boost_disabled
    }

    /// Start line marker.
    pub fn start_checkpoint(&self) -> u8 {
        self.start_checkpoint
    }

    /// `(row, col)` of the start line cell ships line up next to.
    pub fn start_cell(&self) -> (usize, usize) {
        self.start_cell
    }

    /// Cell at grid coordinates. Anything outside the grid is road.
    pub fn cell(&self, row: i32, col: i32) -> Cell {
        if row < 0 || col < 0 {
            return Cell::Road;
        }
        self.rows
            .get(row as usize)
            .and_then(|r| r.get(col as usize))
            .copied()
            .unwrap_or(Cell::Road)
    }

    /// Cell under a world position.
    pub fn cell_at(&self, position: FixedVec2) -> Cell {
        self.cell(cell_index(position.y), cell_index(position.x))
    }

    /// Checkpoint marker under a position, if any.
    pub fn checkpoint_at(&self, position: FixedVec2) -> Option<u8> {
        match self.cell_at(position) {
            Cell::Checkpoint(n) => Some(n),
            _ => None,
        }
    }

    /// Position is on slow terrain.
    pub fn is_slow_at(&self, position: FixedVec2) -> bool {
        self.cell_at(position) == Cell::Slow
    }

    /// Cell is solid.
    pub fn is_wall(&self, row: i32, col: i32) -> bool {
        self.cell(row, col) == Cell::Wall
    }

    /// Every wall cell, row-major.
    pub fn wall_cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.rows.iter().enumerate().flat_map(|(i, row)| {
            row.iter()
                .enumerate()
                .filter(|(_, c)| **c == Cell::Wall)
                .map(move |(j, _)| (i as i32, j as i32))
        })
    }

    /// Grid position for a slot, staggered so ships never overlap.
    ///
    /// Ships line up in the cell after the start marker, three units apart
    /// along X, odd slots four units further up.
    pub fn spawn_position(&self, slot: Slot) -> FixedVec2 {
        let (i, j) = self.start_cell;
        let base_x = j as Fixed * CELL_EDGE + CELL_EDGE * 3 / 4;
        let base_y = i as Fixed * CELL_EDGE + CELL_EDGE / 5;

        let dx = 3 * FIXED_ONE * slot as Fixed;
        let dy = if slot % 2 == 0 { 0 } else { -4 * FIXED_ONE };

        FixedVec2::new(base_x + dx, base_y + dy)
    }
}

impl TryFrom<TrackDef> for Track {
    type Error = TrackError;

    fn try_from(def: TrackDef) -> Result<Self, Self::Error> {
        Ok(Track::from_rows(def.name, &def.grid)?.with_boost_disabled(def.boost_disabled))
    }
}

impl From<Track> for TrackDef {
    fn from(track: Track) -> Self {
        TrackDef {
            grid: track
                .rows
                .iter()
                .map(|row| row.iter().map(|c| c.to_char()).collect())
                .collect(),
            name: track.name,
            boost_disabled: track.boost_disabled,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::to_fixed;

    #[test]
    fn test_oval_parses() {
        let track = Track::oval();
        assert_eq!(track.start_checkpoint(), 9);
        assert_eq!(track.start_cell(), (1, 6));
        assert_eq!(track.cell(5, 5), Cell::Slow);
        assert!(track.is_wall(0, 0));
        assert!(!track.boost_disabled());
    }

    #[test]
    fn test_out_of_bounds_is_road() {
        let track = Track::oval();
        assert_eq!(track.cell(-1, 3), Cell::Road);
        assert_eq!(track.cell(3, 200), Cell::Road);
        assert_eq!(track.cell(200, 0), Cell::Road);
    }

    #[test]
    fn test_cell_lookup_uses_centred_cells() {
        let track = Track::oval();
        // Cell (1, 6) covers x in [55, 65), y in [5, 15)
        assert_eq!(track.checkpoint_at(FixedVec2::new(to_fixed(55.0), to_fixed(5.0))), Some(9));
        assert_eq!(track.checkpoint_at(FixedVec2::new(to_fixed(64.9), to_fixed(14.9))), Some(9));
        assert_eq!(track.checkpoint_at(FixedVec2::new(to_fixed(65.0), to_fixed(10.0))), None);
    }

    #[test]
    fn test_spawn_positions() {
        let track = Track::oval();
        // Start cell (1, 6): x = 67.5 + 3 * slot, y = 12 - (4 if odd)
        assert_eq!(track.spawn_position(0), FixedVec2::new(to_fixed(67.5), to_fixed(12.0)));
        assert_eq!(track.spawn_position(1), FixedVec2::new(to_fixed(70.5), to_fixed(8.0)));
        assert_eq!(track.spawn_position(2), FixedVec2::new(to_fixed(73.5), to_fixed(12.0)));

        // Slot 0 starts one cell past the start line, on road
        assert_eq!(track.cell_at(track.spawn_position(0)), Cell::Road);
    }

    #[test]
    fn test_missing_checkpoint() {
        assert_eq!(Track::from_rows("x", &["###", "# #", "###"]), Err(TrackError::NoCheckpoint));
        assert_eq!(Track::from_rows("x", Vec::<&str>::new()), Err(TrackError::Empty));
    }

    #[test]
    fn test_invalid_cell() {
        let err = Track::from_rows("x", &["#1x#"]).unwrap_err();
        assert_eq!(err, TrackError::InvalidCell { row: 0, col: 2, ch: 'x' });
    }

    #[test]
    fn test_first_start_marker_wins() {
        let track = Track::from_rows("x", &["#  3 #", "# 3 1#"]).unwrap();
        assert_eq!(track.start_cell(), (0, 3));
    }

    #[test]
    fn test_wall_cells() {
        let track = Track::from_rows("x", &["#1#"]).unwrap();
        let walls: Vec<_> = track.wall_cells().collect();
        assert_eq!(walls, vec![(0, 0), (0, 2)]);
    }

    #[test]
    fn test_serde_through_text_grid() {
        let track = Track::oval().with_boost_disabled(true);
        let json = serde_json::to_string(&track).unwrap();
        let back: Track = serde_json::from_str(&json).unwrap();
        assert_eq!(back, track);

        let bad = "{\"name\":\"x\",\"grid\":[\"###\"]}";
        assert!(serde_json::from_str::<Track>(bad).is_err());
    }
}

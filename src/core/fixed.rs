//! Q16.16 Fixed-Point Arithmetic
//!
//! Deterministic fixed-point math for the race simulation.
//! All operations use integer arithmetic only - no floats in gameplay logic.
//!
//! ## Format: Q16.16
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Bit Layout: Q16.16 (32-bit signed integer)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  [S][IIIIIIIIIIIIIIII][FFFFFFFFFFFFFFFF]                    │
//! │   │  └──── 16 bits ────┘└──── 16 bits ────┘                 │
//! │   └─ Sign bit                                               │
//! │                                                             │
//! │  Range: -32768.0 to +32767.99998 (approx)                   │
//! │  Precision: 1/65536 ≈ 0.000015 units                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A track cell is 10 units wide, so the range covers tracks of up to
//! ~3000 cells per side. Lap times are stored in seconds, which caps a
//! single lap at ~9 hours.

use std::fmt;

/// Q16.16 fixed-point number stored as i32.
/// 16 bits integer, 16 bits fractional.
pub type Fixed = i32;

/// Number of fractional bits (16)
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE; // 65536

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1; // 32768

// =============================================================================
// SIMULATION CONSTANTS (All as integer literals - NO float conversion!)
// =============================================================================

/// Tick duration: 1/60 second = round(65536/60) = 1092
pub const TICK_DURATION: Fixed = 1092;

/// Thruster force: 300.0 = 300 * 65536
pub const FORCE: Fixed = 19_660_800;

/// Inverse ship mass: 1/5 = 0.2 * 65536 (floor)
pub const SHIP_INV_MASS: Fixed = 13107;

/// Half the side of a ship's square hull: 1.0
pub const SHIP_HALF_EXTENT: Fixed = FIXED_ONE;

/// Side of a square track cell: 10.0
pub const CELL_EDGE: Fixed = 655_360;

/// Half a track cell: 5.0
pub const HALF_EDGE: Fixed = 327_680;

/// Air drag applied every tick: 0.99 * 65536 (floor)
pub const AIR_DRAG: Fixed = 64880;

/// Extra drag on slow terrain: 0.95 * 65536 (floor)
pub const SLOW_SURFACE_DRAG: Fixed = 62259;

/// Restitution of a ship bouncing off a wall: 0.001 * 65536 (floor)
pub const WALL_RESTITUTION: Fixed = 65;

/// Tangential speed kept per tick while scraping a wall: 0.9 * 65536 (floor)
pub const WALL_FRICTION: Fixed = 58982;

/// Restitution of two ships bouncing off each other: 0.4 * 65536 (floor)
pub const SHIP_RESTITUTION: Fixed = 26214;

/// How far ahead a ship can sit in another's slipstream: 15.0
pub const DRAFT_RANGE: Fixed = 983_040;

/// Lateral half-width of the slipstream: 1.5
pub const DRAFT_HALF_WIDTH: Fixed = 98_304;

// =============================================================================
// CORE OPERATIONS (All deterministic, wrapping semantics)
// =============================================================================

/// Convert a compile-time float to fixed-point.
///
/// # Warning
/// Only use at compile-time or initialization. NEVER in the tick loop.
///
/// # Example
/// ```
/// use hover_race::core::fixed::{to_fixed, FIXED_ONE};
/// const MY_VALUE: i32 = to_fixed(2.5);
/// assert_eq!(MY_VALUE, FIXED_ONE * 2 + FIXED_ONE / 2);
/// ```
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Convert fixed-point to float for display/rendering.
///
/// # Warning
/// Only use for visual output. NEVER use result in game logic.
#[inline]
pub fn to_float(f: Fixed) -> f32 {
    f as f32 / FIXED_ONE as f32
}

/// Convert a duration in microseconds to fixed-point seconds.
///
/// Saturates instead of wrapping for durations beyond the Q16.16 range.
#[inline]
pub fn micros_to_fixed(micros: i64) -> Fixed {
    let wide = (micros << FIXED_SCALE) / 1_000_000;
    wide.clamp(i32::MIN as i64, i32::MAX as i64) as Fixed
}

/// Multiply two fixed-point numbers.
///
/// Uses i64 intermediate to prevent overflow, then shifts back.
///
/// # Determinism
/// - Arithmetic shift rounds toward negative infinity
#[inline]
pub fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    let wide = (a as i64) * (b as i64);
    (wide >> FIXED_SCALE) as Fixed
}

/// Absolute value of a fixed-point number.
#[inline]
pub fn fixed_abs(x: Fixed) -> Fixed {
    if x < 0 { x.wrapping_neg() } else { x }
}

/// Floor division of a coordinate into a track cell index.
///
/// Cells are centred on multiples of `CELL_EDGE`, so the boundary between
/// cell `n` and `n + 1` sits at `n * CELL_EDGE + HALF_EDGE`.
#[inline]
pub fn cell_index(coordinate: Fixed) -> i32 {
    (coordinate as i64 + HALF_EDGE as i64).div_euclid(CELL_EDGE as i64) as i32
}

/// Seconds as a display wrapper (`{:.3}` formatting of a fixed value).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Seconds(pub Fixed);

impl fmt::Debug for Seconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", to_float(self.0))
    }
}

impl fmt::Display for Seconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", to_float(self.0))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_constants() {
        assert_eq!(FIXED_ONE, 65536);
        assert_eq!(FIXED_HALF, 32768);
        assert_eq!(FIXED_SCALE, 16);
    }

    #[test]
    fn test_to_fixed() {
        assert_eq!(to_fixed(1.0), FIXED_ONE);
        assert_eq!(to_fixed(0.5), FIXED_HALF);
        assert_eq!(to_fixed(-1.0), -FIXED_ONE);
    }

    #[test]
    fn test_game_constants() {
        assert_eq!(TICK_DURATION, 1092); // round(65536/60)
        assert_eq!(FORCE, 300 * FIXED_ONE);
        assert_eq!(CELL_EDGE, 10 * FIXED_ONE);
        assert_eq!(HALF_EDGE, CELL_EDGE / 2);
        assert_eq!(AIR_DRAG, to_fixed(0.99));
        assert_eq!(SLOW_SURFACE_DRAG, to_fixed(0.95));
        assert_eq!(SHIP_RESTITUTION, to_fixed(0.4));
        assert_eq!(DRAFT_RANGE, 15 * FIXED_ONE);
    }

    #[test]
    fn test_fixed_mul() {
        assert_eq!(fixed_mul(to_fixed(2.0), to_fixed(3.0)), to_fixed(6.0));
        assert_eq!(fixed_mul(FIXED_HALF, FIXED_HALF), to_fixed(0.25));
        assert_eq!(fixed_mul(to_fixed(-2.0), to_fixed(3.0)), to_fixed(-6.0));
    }

    #[test]
    fn test_micros_to_fixed() {
        assert_eq!(micros_to_fixed(1_000_000), FIXED_ONE);
        assert_eq!(micros_to_fixed(500_000), FIXED_HALF);
        assert_eq!(micros_to_fixed(0), 0);
        // One tick worth of microseconds lands on the tick constant
        assert!((micros_to_fixed(16_667) - TICK_DURATION).abs() <= 1);
        // Saturates rather than wrapping
        assert_eq!(micros_to_fixed(i64::MAX >> 20), i32::MAX);
    }

    #[test]
    fn test_cell_index() {
        assert_eq!(cell_index(0), 0);
        assert_eq!(cell_index(to_fixed(4.99)), 0);
        assert_eq!(cell_index(to_fixed(5.0)), 1);
        assert_eq!(cell_index(to_fixed(14.9)), 1);
        assert_eq!(cell_index(to_fixed(-5.0)), 0);
        assert_eq!(cell_index(to_fixed(-5.01)), -1);
    }

    #[test]
    fn test_seconds_display() {
        assert_eq!(Seconds(to_fixed(1.5)).to_string(), "1.500");
    }

    #[test]
    fn test_fixed_determinism() {
        for _ in 0..1000 {
            let a = 12345678;
            let b = 87654321;
            assert_eq!(fixed_mul(a, b), fixed_mul(a, b));
        }
    }
}

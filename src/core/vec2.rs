//! Fixed-Point 2D Vector
//!
//! Deterministic 2D vector operations for ship physics, plus the
//! quarter-turn [`Heading`] ships steer with.
//!
//! Screen convention: +X is right, +Y is down.

use std::fmt;
use std::ops::{Add, Sub, Neg};
use serde::{Serialize, Deserialize};

use super::fixed::{Fixed, FIXED_ONE, FIXED_SCALE, fixed_mul, fixed_abs};

/// 2D vector with fixed-point components.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FixedVec2 {
    /// X component (Q16.16 fixed-point)
    pub x: Fixed,
    /// Y component (Q16.16 fixed-point)
    pub y: Fixed,
}

impl FixedVec2 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Create a new vector from fixed-point components.
    #[inline]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create a vector from integer components.
    #[inline]
    pub const fn from_ints(x: i32, y: i32) -> Self {
        Self {
            x: x << FIXED_SCALE,
            y: y << FIXED_SCALE,
        }
    }

    /// Add another vector.
    #[inline]
    pub fn add(self, other: Self) -> Self {
        Self {
            x: self.x.wrapping_add(other.x),
            y: self.y.wrapping_add(other.y),
        }
    }

    /// Subtract another vector.
    #[inline]
    pub fn sub(self, other: Self) -> Self {
        Self {
            x: self.x.wrapping_sub(other.x),
            y: self.y.wrapping_sub(other.y),
        }
    }

    /// Scale by a fixed-point scalar.
    #[inline]
    pub fn scale(self, scalar: Fixed) -> Self {
        Self {
            x: fixed_mul(self.x, scalar),
            y: fixed_mul(self.y, scalar),
        }
    }

    /// Component-wise absolute value.
    #[inline]
    pub fn abs(self) -> Self {
        Self {
            x: fixed_abs(self.x),
            y: fixed_abs(self.y),
        }
    }

    /// Negate both components.
    #[inline]
    pub fn negate(self) -> Self {
        Self {
            x: self.x.wrapping_neg(),
            y: self.y.wrapping_neg(),
        }
    }

    /// Convert to float tuple for rendering.
    #[inline]
    pub fn to_floats(self) -> (f32, f32) {
        (
            self.x as f32 / FIXED_ONE as f32,
            self.y as f32 / FIXED_ONE as f32,
        )
    }
}

// Operator overloads for ergonomics
impl Add for FixedVec2 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.add(rhs)
    }
}

impl Sub for FixedVec2 {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.sub(rhs)
    }
}

impl Neg for FixedVec2 {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        self.negate()
    }
}

impl fmt::Debug for FixedVec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (fx, fy) = self.to_floats();
        write!(f, "Vec2({:.3}, {:.3})", fx, fy)
    }
}

impl fmt::Display for FixedVec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (fx, fy) = self.to_floats();
        write!(f, "({:.3}, {:.3})", fx, fy)
    }
}

// =============================================================================
// HEADING
// =============================================================================

/// Body angle in whole quarter turns, clockwise on screen.
///
/// Ships have fixed rotation and only ever snap by ±90°, so every angle a
/// ship can hold is one of four values. Rotating by a `Heading` is exact.
///
/// The names give the direction of the body's local +X axis. A ship's nose
/// is local -Y, a quarter turn anticlockwise of that: a ship at `NORTH`
/// thrusts toward world -X (screen left), at `WEST` toward +Y (screen
/// down), at `SOUTH` toward +X and at `EAST` toward -Y.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Heading(u8);

impl Heading {
    /// 0 radians.
    pub const EAST: Self = Self(0);
    /// π/2 radians.
    pub const SOUTH: Self = Self(1);
    /// π radians.
    pub const WEST: Self = Self(2);
    /// -π/2 radians, the spawn angle. Thrust points to world -X.
    pub const NORTH: Self = Self(3);

    /// Heading from a quarter-turn count (any integer, wrapped into 0..4).
    #[inline]
    pub const fn from_quarters(quarters: i32) -> Self {
        Self(quarters.rem_euclid(4) as u8)
    }

    /// Quarter turns in 0..4.
    #[inline]
    pub const fn quarters(self) -> u8 {
        self.0
    }

    /// Snap 90° counter-clockwise (angle -= π/2).
    #[inline]
    pub const fn turned_left(self) -> Self {
        Self::from_quarters(self.0 as i32 - 1)
    }

    /// Snap 90° clockwise (angle += π/2).
    #[inline]
    pub const fn turned_right(self) -> Self {
        Self::from_quarters(self.0 as i32 + 1)
    }

    /// Rotate a body-local vector into the world frame.
    #[inline]
    pub fn rotate(self, local: FixedVec2) -> FixedVec2 {
        let FixedVec2 { x, y } = local;
        match self.0 {
            0 => FixedVec2::new(x, y),
            1 => FixedVec2::new(y.wrapping_neg(), x),
            2 => FixedVec2::new(x.wrapping_neg(), y.wrapping_neg()),
            _ => FixedVec2::new(y, x.wrapping_neg()),
        }
    }

    /// Rotate a world vector into the body-local frame.
    #[inline]
    pub fn unrotate(self, world: FixedVec2) -> FixedVec2 {
        Self::from_quarters(-(self.0 as i32)).rotate(world)
    }
}

// =============================================================================
// TESTS
// =============================================================================

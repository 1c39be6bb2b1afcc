//! Deterministic Physics Context
//!
//! A small fixed-point rigid-body stepper for square, non-rotating ship
//! hulls against a static grid of wall boxes.
//!
//! ## Ownership
//!
//! Every `Game` owns its own `PhysicsContext`. The body arena is indexed by
//! slot and reused across ticks, but `reset_world` clears everything that
//! could carry over between `evolve` calls: forces, velocities, body ids
//! and world membership. Nothing here is process-global.
//!
//! ## Step order
//!
//! 1. Semi-implicit Euler: `v += F/m * dt`, then `p += v * dt`
//! 2. Ship vs ship push-out and restitution, pairs in ascending slot order
//! 3. Ship vs wall push-out, wall cells in row-major order

use std::collections::BTreeSet;

use crate::core::fixed::{
    Fixed, FIXED_ONE, cell_index, fixed_mul, fixed_abs, CELL_EDGE, HALF_EDGE,
    SHIP_HALF_EXTENT, SHIP_INV_MASS, SHIP_RESTITUTION, WALL_FRICTION, WALL_RESTITUTION,
};
use crate::core::vec2::{FixedVec2, Heading};
use crate::game::state::Slot;
use crate::game::track::Track;

/// Body identifier, handed out by a counter that restarts on every reset.
pub type BodyId = u32;

// =============================================================================
// BODY
// =============================================================================

/// A dynamic ship body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Body {
    /// Id for this tick
    pub id: BodyId,
    /// Centre of the hull
    pub position: FixedVec2,
    /// Units per second
    pub velocity: FixedVec2,
    /// Accumulated world-frame force for the next step
    pub force: FixedVec2,
    /// Quarter-turn angle
    pub angle: Heading,
}

impl Body {
    fn neutral(id: BodyId) -> Self {
        Self {
            id,
            position: FixedVec2::ZERO,
            velocity: FixedVec2::ZERO,
            force: FixedVec2::ZERO,
            angle: Heading::EAST,
        }
    }

    /// Apply a force given in the body's local frame.
    #[inline]
    pub fn apply_force_local(&mut self, local: FixedVec2) {
        self.force = self.force + self.angle.rotate(local);
    }

    /// Load kinematics from a ship snapshot and clear accumulated force.
    pub fn set_kinematics(&mut self, position: FixedVec2, velocity: FixedVec2, angle: Heading) {
        self.position = position;
        self.velocity = velocity;
        self.angle = angle;
        self.force = FixedVec2::ZERO;
    }

    /// Scale velocity by a fixed-point factor.
    #[inline]
    pub fn damp(&mut self, factor: Fixed) {
        self.velocity = self.velocity.scale(factor);
    }
}

#[derive(Clone, Debug)]
struct ArenaEntry {
    body: Body,
    /// False once destroyed; kept until the slot is spawned again
    live: bool,
    /// Participates in the current step
    in_world: bool,
}

// =============================================================================
// PHYSICS CONTEXT
// =============================================================================

/// Static wall box centred on a grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct WallBox {
    row: i32,
    col: i32,
}

impl WallBox {
    fn center(self) -> FixedVec2 {
        FixedVec2::new(
            self.col.wrapping_mul(CELL_EDGE),
            self.row.wrapping_mul(CELL_EDGE),
        )
    }
}

/// World of ship bodies plus the track's static walls.
#[derive(Clone, Debug)]
pub struct PhysicsContext {
    walls: Vec<WallBox>,
    wall_cells: BTreeSet<(i32, i32)>,
    bodies: Vec<Option<ArenaEntry>>,
    next_id: BodyId,
}

impl PhysicsContext {
    /// Build a context with one static box per wall cell of the track.
    pub fn new(track: &Track) -> Self {
        let walls: Vec<WallBox> = track
            .wall_cells()
            .map(|(row, col)| WallBox { row, col })
            .collect();
        let wall_cells = walls.iter().map(|w| (w.row, w.col)).collect();

        let mut ctx = Self {
            walls,
            wall_cells,
            bodies: Vec::new(),
            next_id: 0,
        };
        ctx.reset_world();
        ctx
    }

    /// Number of static bodies (they hold ids `0..static_count`).
    pub fn static_count(&self) -> usize {
        self.walls.len()
    }

    /// Empty the world of dynamic bodies and restart the id counter after
    /// the statics.
    pub fn reset_world(&mut self) {
        self.next_id = self.walls.len() as BodyId;
        for entry in self.bodies.iter_mut().flatten() {
            entry.in_world = false;
        }
    }

    fn fresh_id(&mut self) -> BodyId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn entry_mut(&mut self, slot: Slot) -> &mut Option<ArenaEntry> {
        if self.bodies.len() <= slot {
            self.bodies.resize_with(slot + 1, || None);
        }
        &mut self.bodies[slot]
    }

    /// Make sure `slot` has a neutral body in the world: created on first
    /// use, otherwise reset with a fresh id.
    pub fn ensure_body(&mut self, slot: Slot) {
        let id = self.fresh_id();
        *self.entry_mut(slot) = Some(ArenaEntry {
            body: Body::neutral(id),
            live: true,
            in_world: true,
        });
    }

    /// Create the body of a newly spawned ship.
    pub fn spawn_body(&mut self, slot: Slot, position: FixedVec2, angle: Heading) -> &Body {
        let id = self.fresh_id();
        let mut body = Body::neutral(id);
        body.position = position;
        body.angle = angle;

        let entry = self.entry_mut(slot).insert(ArenaEntry {
            body,
            live: true,
            in_world: true,
        });
        &entry.body
    }

    /// Take a destroyed ship's body out of the world. The arena entry stays
    /// as garbage until the slot is spawned again.
    pub fn kill_body(&mut self, slot: Slot) {
        if let Some(Some(entry)) = self.bodies.get_mut(slot) {
            entry.live = false;
            entry.in_world = false;
        }
    }

    /// Live body in a slot.
    pub fn body(&self, slot: Slot) -> Option<&Body> {
        self.bodies
            .get(slot)
            .and_then(Option::as_ref)
            .filter(|e| e.live)
            .map(|e| &e.body)
    }

    /// Live body in a slot, mutably.
    pub fn body_mut(&mut self, slot: Slot) -> Option<&mut Body> {
        self.bodies
            .get_mut(slot)
            .and_then(Option::as_mut)
            .filter(|e| e.live)
            .map(|e| &mut e.body)
    }

    /// Slots whose bodies take part in the next step.
    pub fn slots_in_world(&self) -> impl Iterator<Item = Slot> + '_ {
        self.bodies
            .iter()
            .enumerate()
            .filter(|(_, e)| e.as_ref().is_some_and(|e| e.in_world))
            .map(|(slot, _)| slot)
    }

    /// Advance the world by `dt` seconds.
    pub fn step(&mut self, dt: Fixed) {
        self.integrate(dt);
        self.resolve_ships();
        self.resolve_walls();
    }

    fn integrate(&mut self, dt: Fixed) {
        for entry in self.bodies.iter_mut().flatten().filter(|e| e.in_world) {
            let body = &mut entry.body;
            let accel = body.force.scale(SHIP_INV_MASS);
            body.velocity = body.velocity + accel.scale(dt);
            body.position = body.position + body.velocity.scale(dt);
            body.force = FixedVec2::ZERO;
        }
    }

    fn resolve_ships(&mut self) {
        let n = self.bodies.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let (head, tail) = self.bodies.split_at_mut(j);
                let (Some(a), Some(b)) = (head[i].as_mut(), tail[0].as_mut()) else {
                    continue;
                };
                if a.in_world && b.in_world {
                    collide_ships(&mut a.body, &mut b.body);
                }
            }
        }
    }

    fn resolve_walls(&mut self) {
        let wall_cells = &self.wall_cells;
        for entry in self.bodies.iter_mut().flatten().filter(|e| e.in_world) {
            collide_walls(&mut entry.body, wall_cells);
        }
    }
}

// =============================================================================
// CONTACT RESOLUTION
// =============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

#[inline]
fn sign(v: Fixed) -> Fixed {
    if v < 0 { -1 } else { 1 }
}

/// Ship vs ship: separate along the axis of least overlap and exchange a
/// restitution impulse (equal masses).
fn collide_ships(a: &mut Body, b: &mut Body) {
    let d = b.position - a.position;
    let reach = SHIP_HALF_EXTENT * 2;
    let ox = reach - fixed_abs(d.x);
    let oy = reach - fixed_abs(d.y);
    if ox <= 0 || oy <= 0 {
        return;
    }

    let axis = if ox <= oy { Axis::X } else { Axis::Y };
    let (overlap, dir) = match axis {
        Axis::X => (ox, sign(d.x)),
        Axis::Y => (oy, sign(d.y)),
    };

    let push_a = overlap / 2;
    let push_b = overlap - push_a;
    let (pa, pb, va, vb) = match axis {
        Axis::X => (&mut a.position.x, &mut b.position.x, &mut a.velocity.x, &mut b.velocity.x),
        Axis::Y => (&mut a.position.y, &mut b.position.y, &mut a.velocity.y, &mut b.velocity.y),
    };
    *pa = pa.wrapping_sub(push_a * dir);
    *pb = pb.wrapping_add(push_b * dir);

    // Closing speed along the contact normal (a -> b)
    let closing = (*va - *vb) * dir;
    if closing > 0 {
        let impulse = fixed_mul(closing, FIXED_ONE + SHIP_RESTITUTION) / 2;
        *va -= impulse * dir;
        *vb += impulse * dir;
    }
}

/// Ship vs static walls. Faces shared by two wall cells are never used as
/// contact normals, so hulls slide along straight walls without snagging
/// on cell seams.
fn collide_walls(body: &mut Body, wall_cells: &BTreeSet<(i32, i32)>) {
    let reach = SHIP_HALF_EXTENT + HALF_EDGE;

    let row_min = cell_index(body.position.y - SHIP_HALF_EXTENT);
    let row_max = cell_index(body.position.y + SHIP_HALF_EXTENT);
    let col_min = cell_index(body.position.x - SHIP_HALF_EXTENT);
    let col_max = cell_index(body.position.x + SHIP_HALF_EXTENT);

    for row in row_min..=row_max {
        for col in col_min..=col_max {
            if !wall_cells.contains(&(row, col)) {
                continue;
            }

            let center = WallBox { row, col }.center();
            let d = body.position - center;
            let ox = reach - fixed_abs(d.x);
            let oy = reach - fixed_abs(d.y);
            if ox <= 0 || oy <= 0 {
                continue;
            }

            let x_open = !wall_cells.contains(&(row, col + sign(d.x)));
            let y_open = !wall_cells.contains(&(row + sign(d.y), col));
            let axis = match (x_open, y_open) {
                (true, false) => Axis::X,
                (false, true) => Axis::Y,
                _ if ox <= oy => Axis::X,
                _ => Axis::Y,
            };

            let (pos_n, vel_n, vel_t, overlap, dir) = match axis {
                Axis::X => (&mut body.position.x, &mut body.velocity.x, &mut body.velocity.y, ox, sign(d.x)),
                Axis::Y => (&mut body.position.y, &mut body.velocity.y, &mut body.velocity.x, oy, sign(d.y)),
            };

            *pos_n = pos_n.wrapping_add(overlap * dir);
            if *vel_n * dir < 0 {
                *vel_n = fixed_mul(-*vel_n, WALL_RESTITUTION);
                *vel_t = fixed_mul(*vel_t, WALL_FRICTION);
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::{to_fixed, FORCE, TICK_DURATION};

    fn open_track() -> Track {
        Track::from_rows("open", &["#########", "#   1   #", "#########"]).unwrap()
    }

    #[test]
    fn test_statics_hold_first_ids() {
        let mut ctx = PhysicsContext::new(&open_track());
        let statics = ctx.static_count() as BodyId;
        assert_eq!(statics, 20);

        ctx.ensure_body(0);
        ctx.ensure_body(3);
        assert_eq!(ctx.body(0).map(|b| b.id), Some(statics));
        assert_eq!(ctx.body(3).map(|b| b.id), Some(statics + 1));
    }

    #[test]
    fn test_reset_restarts_ids_and_clears_state() {
        let mut ctx = PhysicsContext::new(&open_track());
        ctx.ensure_body(0);
        if let Some(b) = ctx.body_mut(0) {
            b.set_kinematics(FixedVec2::from_ints(20, 10), FixedVec2::from_ints(5, 0), Heading::WEST);
            b.apply_force_local(FixedVec2::new(FORCE, 0));
        }

        ctx.reset_world();
        assert_eq!(ctx.slots_in_world().count(), 0);

        ctx.ensure_body(0);
        let body = ctx.body(0).copied().unwrap();
        assert_eq!(body.id, ctx.static_count() as BodyId);
        assert_eq!(body.position, FixedVec2::ZERO);
        assert_eq!(body.velocity, FixedVec2::ZERO);
        assert_eq!(body.force, FixedVec2::ZERO);
    }

    #[test]
    fn test_killed_body_leaves_world() {
        let mut ctx = PhysicsContext::new(&open_track());
        ctx.spawn_body(2, FixedVec2::from_ints(20, 10), Heading::NORTH);
        assert_eq!(ctx.slots_in_world().collect::<Vec<_>>(), vec![2]);

        ctx.kill_body(2);
        assert!(ctx.body(2).is_none());
        assert_eq!(ctx.slots_in_world().count(), 0);
    }

    #[test]
    fn test_forward_force_integrates() {
        let mut ctx = PhysicsContext::new(&open_track());
        ctx.spawn_body(0, FixedVec2::from_ints(40, 10), Heading::NORTH);
        if let Some(b) = ctx.body_mut(0) {
            b.apply_force_local(FixedVec2::new(0, -FORCE));
        }
        ctx.step(TICK_DURATION);

        let body = ctx.body(0).copied().unwrap();
        // 300 / 5 / 60 = 1 unit/s gained, pointing at -X
        assert!((body.velocity.x + FIXED_ONE).abs() < 64, "{:?}", body.velocity);
        assert_eq!(body.velocity.y, 0);
        assert!(body.position.x < to_fixed(40.0));
    }

    #[test]
    fn test_wall_stops_ship() {
        let mut ctx = PhysicsContext::new(&open_track());
        // Row 1 spans y in [5, 15); the wall row above ends at y = 5
        ctx.spawn_body(0, FixedVec2::from_ints(40, 10), Heading::NORTH);
        if let Some(b) = ctx.body_mut(0) {
            b.velocity = FixedVec2::from_ints(0, -300);
        }
        for _ in 0..5 {
            ctx.step(TICK_DURATION);
        }

        let body = ctx.body(0).copied().unwrap();
        assert!(body.position.y >= to_fixed(6.0) - 1, "{:?}", body.position);
        assert!(body.velocity.y.abs() < FIXED_ONE);
    }

    #[test]
    fn test_sliding_along_wall_keeps_moving() {
        let mut ctx = PhysicsContext::new(&open_track());
        // Touching the top wall, moving along it
        ctx.spawn_body(0, FixedVec2::new(to_fixed(60.0), to_fixed(6.0) - 100), Heading::NORTH);
        if let Some(b) = ctx.body_mut(0) {
            b.velocity = FixedVec2::from_ints(-60, 0);
        }
        for _ in 0..30 {
            ctx.step(TICK_DURATION);
        }
        let body = ctx.body(0).copied().unwrap();
        assert!(body.position.x < to_fixed(40.0), "{:?}", body.position);
    }

    #[test]
    fn test_ships_separate() {
        let mut ctx = PhysicsContext::new(&open_track());
        ctx.spawn_body(0, FixedVec2::from_ints(30, 10), Heading::NORTH);
        ctx.spawn_body(1, FixedVec2::new(to_fixed(31.0), to_fixed(10.0)), Heading::NORTH);
        if let Some(b) = ctx.body_mut(0) {
            b.velocity = FixedVec2::from_ints(10, 0);
        }
        ctx.step(TICK_DURATION);

        let a = ctx.body(0).copied().unwrap();
        let b = ctx.body(1).copied().unwrap();
        assert!(b.position.x - a.position.x >= 2 * SHIP_HALF_EXTENT - 1);
        // Momentum moved to the struck ship
        assert!(b.velocity.x > 0);
        assert!(a.velocity.x < to_fixed(10.0));
    }

    #[test]
    fn test_step_is_deterministic() {
        let run = || {
            let mut ctx = PhysicsContext::new(&open_track());
            ctx.spawn_body(0, FixedVec2::from_ints(30, 10), Heading::NORTH);
            ctx.spawn_body(1, FixedVec2::from_ints(33, 8), Heading::NORTH);
            let mut out = Vec::new();
            for _ in 0..120 {
                for slot in 0..2 {
                    if let Some(b) = ctx.body_mut(slot) {
                        b.apply_force_local(FixedVec2::new(FORCE / 3, -FORCE));
                    }
                }
                ctx.step(TICK_DURATION);
                out.push((ctx.body(0).copied(), ctx.body(1).copied()));
            }
            out
        };
        assert_eq!(run(), run());
    }
}

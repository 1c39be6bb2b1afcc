//! Turn Evolution
//!
//! The deterministic step from one turn to the next. Server and clients run
//! exactly this function over exactly the same inputs, so it must be 100%
//! deterministic: fixed-point math only, slot-ordered iteration and a
//! physics context that is reset on entry.

use crate::core::fixed::{Fixed, AIR_DRAG, DRAFT_HALF_WIDTH, DRAFT_RANGE, FORCE, SLOW_SURFACE_DRAG, fixed_abs};
use crate::core::vec2::{FixedVec2, Heading};
use crate::game::events::{ServerEvent, TurnLog};
use crate::game::input::PlayerInput;
use crate::game::physics::PhysicsContext;
use crate::game::ship::{LapProgress, Ship};
use crate::game::state::{RaceConfig, RacePhase};
use crate::game::track::Track;
use crate::game::turn::{all_humans_finished, Turn};

/// Produce the turn after `prior`.
///
/// # Arguments
///
/// * `prior` - The turn to evolve; its log holds the events consumed here
/// * `track` - Read-only track grid
/// * `config` - Race rules
/// * `physics` - Scratch world, fully reset before use
/// * `dt` - Step length in seconds (`TICK_DURATION`, or less for
///   extrapolation)
///
/// # Phase order
///
/// 1. Body lifecycle sync
/// 2. Server events
/// 3. Player input, forces and drag
/// 4. Physics step
/// 5. Checkpoints, laps and drafting
/// 6. Race state machine
///
/// The returned turn has an empty log.
pub fn evolve(
    prior: &Turn,
    track: &Track,
    config: &RaceConfig,
    physics: &mut PhysicsContext,
    dt: Fixed,
) -> Turn {
    // 1. Body lifecycle sync
    physics.reset_world();
    for (slot, _) in prior.occupied() {
        physics.ensure_body(slot);
    }

    let mut ships = prior.ships.clone();
    let mut phase = prior.phase;
    let mut counter = prior.counter;

    // 2. Server events
    apply_server_events(&mut ships, &prior.log, track, config, physics);

    // 3. Player input
    apply_inputs(&mut ships, &prior.log, phase, track, config, physics);

    // 4. Physics step
    physics.step(dt);

    // 5. Progress
    for (slot, entry) in ships.iter_mut().enumerate() {
        let Some(ship) = entry else { continue };
        let Some(body) = physics.body(slot) else { continue };

        ship.position = body.position;
        ship.velocity = body.velocity;
        ship.angle = body.angle;

        let checkpoint = track.checkpoint_at(ship.position).unwrap_or(ship.checkpoint);
        ship.accumulate_lap_time(dt, config.max_laps);

        let progress = ship.cross_checkpoint(checkpoint, config.max_laps);
        if progress == LapProgress::Finished && phase == RacePhase::InProgress {
            phase = RacePhase::FinishCountdown;
            counter = config.finish_countdown_ticks;
        }
    }
    update_drafting(&mut ships);

    // 6. Race state machine
    counter = counter.saturating_sub(1);
    match phase {
        RacePhase::Countdown => {
            if counter == 0 {
                phase = RacePhase::InProgress;
            }
        }
        RacePhase::FinishCountdown if prior.phase == RacePhase::FinishCountdown => {
            if counter == 0 || all_humans_finished(ships.iter().flatten(), config.max_laps) {
                phase = RacePhase::ResultsScreen;
                counter = config.results_screen_ticks;
            }
        }
        RacePhase::ResultsScreen => {
            if counter == 0 {
                phase = RacePhase::InProgress;
                for (slot, entry) in ships.iter_mut().enumerate() {
                    if let Some(ship) = entry {
                        ship.reset_to_spawn(track.spawn_position(slot));
                    }
                }
            }
        }
        _ => {}
    }

    Turn {
        ships,
        log: TurnLog::new(),
        phase,
        counter,
    }
}

/// Spawn and destroy ships in log order.
fn apply_server_events(
    ships: &mut Vec<Option<Ship>>,
    log: &TurnLog,
    track: &Track,
    config: &RaceConfig,
    physics: &mut PhysicsContext,
) {
    for event in &log.server_events {
        match event {
            ServerEvent::SpawnPlayer { slot, username, color, bot } => {
                let slot = *slot;
                if slot >= config.max_ships {
                    continue;
                }
                let position = track.spawn_position(slot);
                physics.spawn_body(slot, position, Heading::NORTH);

                if ships.len() <= slot {
                    ships.resize_with(slot + 1, || None);
                }
                ships[slot] = Some(Ship::spawn(position, username.clone(), *color, *bot));
            }
            ServerEvent::DestroyPlayer { slot } => {
                if let Some(entry) = ships.get_mut(*slot) {
                    *entry = None;
                }
                physics.kill_body(*slot);
            }
        }
    }

    while matches!(ships.last(), Some(None)) {
        ships.pop();
    }
}

/// Fold each ship's events into its input and load the resulting forces
/// onto its body.
fn apply_inputs(
    ships: &mut [Option<Ship>],
    log: &TurnLog,
    phase: RacePhase,
    track: &Track,
    config: &RaceConfig,
    physics: &mut PhysicsContext,
) {
    for (slot, entry) in ships.iter_mut().enumerate() {
        let Some(ship) = entry else { continue };
        let Some(body) = physics.body_mut(slot) else { continue };

        body.set_kinematics(ship.position, ship.velocity, ship.angle);

        let racing = phase.is_active() && !ship.has_finished_race(config.max_laps);
        let mut input = PlayerInput::fold(ship.input, log.events_for(slot));
        if track.boost_disabled() {
            input.disable_boost();
        }

        if racing {
            if input.turn_left() {
                body.angle = body.angle.turned_left();
            }
            if input.turn_right() {
                body.angle = body.angle.turned_right();
            }

            // Main thruster
            body.apply_force_local(FixedVec2::new(0, -FORCE * input.thrust_multiplier()));

            // Leaning right fires the left thruster and vice versa
            if input.lean_right() {
                body.apply_force_local(FixedVec2::new(FORCE, 0));
            }
            if input.lean_left() {
                body.apply_force_local(FixedVec2::new(-FORCE, 0));
            }
        } else if config.suppress_cosmetic_input {
            input = PlayerInput::new();
        }

        body.damp(AIR_DRAG);
        if track.is_slow_at(body.position) {
            body.damp(SLOW_SURFACE_DRAG);
        }

        ship.input = input;
    }
}

/// A ship is drafting when another ship sits straight ahead of it, inside
/// a narrow box along its heading.
fn update_drafting(ships: &mut [Option<Ship>]) {
    let positions: Vec<Option<FixedVec2>> = ships
        .iter()
        .map(|s| s.as_ref().map(|s| s.position))
        .collect();

    for (slot, entry) in ships.iter_mut().enumerate() {
        let Some(ship) = entry else { continue };
        ship.is_drafting = positions.iter().enumerate().any(|(other, pos)| {
            let Some(pos) = pos else { return false };
            if other == slot {
                return false;
            }
            let local = ship.angle.unrotate(*pos - ship.position);
            let ahead = -local.y;
            ahead > 0 && ahead <= DRAFT_RANGE && fixed_abs(local.x) <= DRAFT_HALF_WIDTH
        });
    }
}

// =============================================================================
// TESTS
// =============================================================================

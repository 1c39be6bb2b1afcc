//! End-to-end rollback behaviour through the public `Game` API.

use std::collections::BTreeMap;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use hover_race::game::input::PlayerEvent;
use hover_race::game::rollback::{Authority, EventOutcome, Game, GameError};
use hover_race::game::state::{ParticipantId, RaceConfig, RacePhase, Slot};
use hover_race::game::track::Track;

/// Start line doubled so the spawn cell is itself a start marker. Ships
/// launch west along open road; the low checkpoints are walled off.
const SPRINT: [&str; 7] = [
    "#############",
    "#           #",
    "#           #",
    "#        99 #",
    "#############",
    "#1  2  3    #",
    "#############",
];

fn racing() -> RaceConfig {
    RaceConfig {
        start_countdown_ticks: 0,
        ..Default::default()
    }
}

fn pid(n: u8) -> ParticipantId {
    ParticipantId::new([n; 16])
}

fn server_with(track: Track, config: RaceConfig, racers: u8) -> Game {
    let mut game = Game::new(track, config, Authority::Server, 0);
    for n in 0..racers {
        game.join(pid(n + 1), format!("racer-{n}"), false).unwrap();
    }
    game
}

type Schedule = BTreeMap<(u32, Slot), Vec<PlayerEvent>>;

/// Play `turns` turns, delivering each batch `delay(target, slot)` turns
/// after its target. Batches that fall due together are applied in the
/// order given by `order_seed`.
fn play(schedule: &Schedule, turns: u32, order_seed: u64, delay: impl Fn(u32, Slot) -> u32) -> Game {
    let mut game = server_with(Track::oval(), racing(), 3);
    let mut rng = StdRng::seed_from_u64(order_seed);

    for now in 0..=turns {
        let mut due: Vec<_> = schedule
            .iter()
            .filter(|((target, slot), _)| target + delay(*target, *slot) == now)
            .collect();
        due.shuffle(&mut rng);

        for ((target, slot), events) in due {
            let _ = game.on_player_events(*slot, events, *target).unwrap();
        }
        if now < turns {
            game.advance();
        }
    }
    game
}

fn any_event() -> impl Strategy<Value = PlayerEvent> {
    prop_oneof![
        Just(PlayerEvent::TurnLeft),
        Just(PlayerEvent::TurnRight),
        any::<bool>().prop_map(PlayerEvent::LeanLeft),
        any::<bool>().prop_map(PlayerEvent::LeanRight),
        any::<bool>().prop_map(PlayerEvent::Gas),
        any::<bool>().prop_map(PlayerEvent::Boost),
    ]
}

fn any_schedule(turns: u32) -> impl Strategy<Value = Schedule> {
    prop::collection::btree_map(
        (0..turns, 0usize..3),
        prop::collection::vec(any_event(), 1..4),
        0..40,
    )
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_late_delivery_matches_on_time(schedule in any_schedule(60), seed in any::<u64>()) {
        let on_time = play(&schedule, 80, seed, |_, _| 0);
        let late = play(&schedule, 80, seed, |target, slot| (target * 7 + slot as u32 * 3) % 20);
        prop_assert_eq!(on_time.current_hash(), late.current_hash());
    }

    #[test]
    fn prop_redelivery_is_idempotent(schedule in any_schedule(40)) {
        let mut game = server_with(Track::oval(), racing(), 3);
        for _ in 0..30 {
            game.advance();
        }
        for ((target, slot), events) in &schedule {
            let _ = game.on_player_events(*slot, events, *target).unwrap();
        }
        let once = game.current_hash();

        for ((target, slot), events) in &schedule {
            let outcome = game.on_player_events(*slot, events, *target).unwrap();
            prop_assert_eq!(outcome, EventOutcome::Unchanged);
        }
        prop_assert_eq!(game.current_hash(), once);
    }

    #[test]
    fn prop_eviction_bound(retention in 1u32..40, steps in 0u32..150) {
        let mut game = Game::new(Track::oval(), racing(), Authority::Server, 0).with_retention(retention);
        for _ in 0..steps {
            game.advance();
            prop_assert!(game.turn_index() - game.retention_floor() <= retention);
            prop_assert_eq!(
                game.history().count() as u32,
                game.turn_index() - game.retention_floor() + 1
            );
        }
    }
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn test_random_out_of_order_delivery() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut schedule = Schedule::new();
    for target in 0..300 {
        for slot in 0..3 {
            if rng.gen_bool(0.2) {
                let events = match rng.gen_range(0..4) {
                    0 => vec![PlayerEvent::Gas(rng.gen())],
                    1 => vec![PlayerEvent::TurnLeft],
                    2 => vec![PlayerEvent::LeanRight(rng.gen()), PlayerEvent::Boost(rng.gen())],
                    _ => vec![PlayerEvent::TurnRight, PlayerEvent::Gas(true)],
                };
                schedule.insert((target, slot), events);
            }
        }
    }
    let delays: BTreeMap<(u32, Slot), u32> = schedule.keys().map(|k| (*k, rng.gen_range(0..25))).collect();

    let on_time = play(&schedule, 330, 1, |_, _| 0);
    let late = play(&schedule, 330, 2, |target, slot| delays[&(target, slot)]);

    assert_eq!(on_time.turn_index(), late.turn_index());
    assert_eq!(on_time.current_turn(), late.current_turn());
}

#[test]
fn test_single_start_crossing_counts_one_lap() {
    let track = Track::from_rows("sprint", SPRINT).unwrap();
    assert_eq!(track.start_checkpoint(), 9);

    let mut game = server_with(track, racing(), 1);
    let _ = game.on_player_events(0, &[PlayerEvent::Gas(true)], 0).unwrap();
    for _ in 0..200 {
        game.advance();
    }

    let ship = game.current_turn().ship(0).unwrap();
    assert_eq!(ship.checkpoint, 9);
    assert_eq!(ship.lap, 1);
    assert_eq!(ship.lap_times.len(), 2);
    assert!(ship.position.x < game.track().spawn_position(0).x);
}

#[test]
fn test_finish_results_and_reset() {
    let track = Track::from_rows("sprint", SPRINT).unwrap();
    let config = RaceConfig {
        max_laps: 0,
        start_countdown_ticks: 0,
        finish_countdown_ticks: 100,
        results_screen_ticks: 10,
        ..Default::default()
    };
    let mut game = server_with(track, config, 1);
    let _ = game.on_player_events(0, &[PlayerEvent::Gas(true)], 0).unwrap();

    // Spawning onto the start line finishes a zero-lap race at once
    game.advance();
    assert_eq!(game.current_turn().phase, RacePhase::FinishCountdown);

    // The only human is done, so results follow on the next turn
    game.advance();
    assert_eq!(game.current_turn().phase, RacePhase::ResultsScreen);
    assert_eq!(game.current_turn().counter, 10);

    for _ in 0..9 {
        game.advance();
        assert_eq!(game.current_turn().phase, RacePhase::ResultsScreen);
    }

    game.advance();
    let turn = game.current_turn();
    assert_eq!(turn.phase, RacePhase::InProgress);
    let ship = turn.ship(0).unwrap();
    assert_eq!(ship.lap, 0);
    assert_eq!(ship.checkpoint, 1);
    assert_eq!(ship.lap_times.len(), 1);
    assert_eq!(ship.position, game.track().spawn_position(0));
}

#[test]
fn test_stale_events_rejected_without_side_effects() {
    let mut game = server_with(Track::oval(), racing(), 2).with_retention(10);
    for _ in 0..25 {
        game.advance();
    }
    let floor = game.retention_floor();
    let before: Vec<_> = game.history().map(|(i, t)| (i, t.clone())).collect();

    let err = game.on_player_events(1, &[PlayerEvent::Gas(true)], floor - 1).unwrap_err();
    assert_eq!(err, GameError::InvalidTurn { target: floor - 1, floor });

    let after: Vec<_> = game.history().map(|(i, t)| (i, t.clone())).collect();
    assert_eq!(before, after);
}

#[test]
fn test_client_converges_after_bootstrap() {
    let mut server = server_with(Track::oval(), racing(), 2);
    for t in 0..90 {
        if t % 15 == 0 {
            let _ = server.on_player_events(t as usize % 2, &[PlayerEvent::Gas(t % 30 == 0)], server.turn_index()).unwrap();
        }
        server.advance();
    }

    let joined = server.join(pid(9), "late", false).unwrap();
    let mut client = Game::from_bootstrap(joined.bootstrap, 0).unwrap();
    assert_eq!(client.current_hash(), server.current_hash());

    // Server-side events after the bootstrap reach the client late
    let target = server.turn_index();
    let _ = server.on_player_events(joined.slot, &[PlayerEvent::TurnRight], target).unwrap();
    for _ in 0..10 {
        server.advance();
        client.advance();
    }
    assert_ne!(client.current_hash(), server.current_hash());

    let _ = client.on_player_events(joined.slot, &[PlayerEvent::TurnRight], target).unwrap();
    assert_eq!(client.current_hash(), server.current_hash());
}

#[test]
fn test_fake_tick_is_pure() {
    let mut game = server_with(Track::oval(), racing(), 1);
    game.tick(3 * hover_race::TICK_US);
    let before: Vec<_> = game.history().map(|(i, t)| (i, t.clone())).collect();
    let hash = game.current_hash();

    let a = game.fake_tick(3 * hover_race::TICK_US + 4_000);
    let b = game.fake_tick(3 * hover_race::TICK_US + 4_000);
    assert_eq!(a, b);

    let after: Vec<_> = game.history().map(|(i, t)| (i, t.clone())).collect();
    assert_eq!(before, after);
    assert_eq!(game.current_hash(), hash);
}

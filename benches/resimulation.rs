//! Cost of a worst-case rollback: an event landing on the oldest retained
//! turn forces the whole window to be resimulated.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use hover_race::game::input::PlayerEvent;
use hover_race::game::rollback::{Authority, Game};
use hover_race::game::state::{ParticipantId, RaceConfig};
use hover_race::game::track::Track;

fn full_race(ships: u8) -> Game {
    let config = RaceConfig {
        start_countdown_ticks: 0,
        ..Default::default()
    };
    let mut game = Game::new(Track::oval(), config, Authority::Server, 0);
    for n in 0..ships {
        let _ = game.join(ParticipantId::new([n + 1; 16]), format!("racer-{n}"), n % 2 == 1);
    }
    for slot in 0..ships as usize {
        let _ = game.on_player_events(slot, &[PlayerEvent::Gas(true)], 0);
    }
    for _ in 0..120 {
        game.advance();
    }
    game
}

fn bench_full_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("resimulate_window");
    for ships in [1u8, 4, 16] {
        let mut game = full_race(ships);
        let floor = game.retention_floor();
        group.bench_with_input(BenchmarkId::from_parameter(ships), &ships, |b, _| {
            b.iter(|| {
                game.resimulate_from(black_box(floor));
                black_box(game.current_hash())
            })
        });
    }
    group.finish();
}

fn bench_single_tick(c: &mut Criterion) {
    let mut game = full_race(16);
    c.bench_function("advance_16_ships", |b| {
        b.iter(|| {
            game.advance();
            black_box(game.turn_index())
        })
    });
}

criterion_group!(benches, bench_full_window, bench_single_tick);
criterion_main!(benches);

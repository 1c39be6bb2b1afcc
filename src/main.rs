//! Hover Race Server
//!
//! Authoritative race server. `--demo` runs an offline rollback check
//! instead of listening.

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hover_race::{
    config::ServerConfig,
    core::hash::short_hex,
    game::{
        input::PlayerEvent,
        rollback::{Authority, Game},
        state::{ParticipantId, RaceConfig},
        track::Track,
    },
    network::{wall_clock_us, GameServer},
    TICK_RATE, TICK_US, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env().context("reading configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("installing tracing subscriber")?;

    info!("Hover Race Server v{}", VERSION);
    info!("Tick Rate: {} Hz", TICK_RATE);

    if std::env::args().any(|arg| arg == "--demo") {
        return demo_rollback(&config);
    }

    let game = Game::new(Track::oval(), config.race.clone(), Authority::Server, wall_clock_us())
        .with_color_seed(config.color_seed);
    let server = GameServer::new(config, game);

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.send(());
        }
    });

    server.run().await?;
    Ok(())
}

/// Drive a server and a bootstrapped client with the same inputs, delivering
/// them to the client late, and check both land on the same turn hash.
fn demo_rollback(config: &ServerConfig) -> Result<()> {
    info!("=== Starting Rollback Demo ===");

    let race = RaceConfig {
        start_countdown_ticks: TICK_RATE,
        ..config.race.clone()
    };
    let mut server = Game::new(Track::oval(), race, Authority::Server, 0).with_color_seed(config.color_seed);

    let racers: Vec<ParticipantId> = (1..=4).map(|n| ParticipantId::new([n; 16])).collect();
    for (i, racer) in racers.iter().enumerate() {
        let joined = server.join(*racer, format!("racer-{}", i + 1), i % 2 == 1)?;
        info!("Racer {} joined in slot {}", racer.short(), joined.slot);
    }

    let mut client = Game::from_bootstrap(server.bootstrap(0), 0)?;

    // Client hears about each turn's events this many turns late
    const LATENCY: u32 = 6;
    let mut in_flight: Vec<(u32, usize, Vec<PlayerEvent>)> = Vec::new();

    let turns = 20 * TICK_RATE;
    for t in 0..turns {
        let target = server.turn_index();
        for slot in 0..racers.len() {
            let events = scripted_events(t, slot);
            if events.is_empty() {
                continue;
            }
            let _ = server.on_player_events(slot, &events, target)?;
            in_flight.push((target, slot, events));
        }

        let now = i64::from(t + 1) * TICK_US;
        server.tick(now);
        client.tick(now);

        let (due, later): (Vec<_>, Vec<_>) = in_flight
            .drain(..)
            .partition(|(target, _, _)| target + LATENCY <= client.turn_index());
        in_flight = later;
        for (target, slot, events) in due.into_iter().rev() {
            let _ = client.on_player_events(slot, &events, target)?;
        }

        if t % (5 * TICK_RATE) == 0 {
            info!(
                "Turn {}: phase {:?}, server {} client {}",
                server.turn_index(),
                server.current_turn().phase,
                short_hex(&server.current_hash()),
                short_hex(&client.current_hash()),
            );
        }
    }

    for (target, slot, events) in in_flight {
        let _ = client.on_player_events(slot, &events, target)?;
    }

    info!("=== Standings ===");
    for (place, standing) in server.current_turn().standings(server.config().max_laps).iter().enumerate() {
        info!("#{}: {} (slot {}) lap {}", place + 1, standing.username, standing.slot, standing.lap);
    }

    let server_hash = server.current_hash();
    let client_hash = client.current_hash();
    info!("Server hash: {}", hex::encode(server_hash));
    info!("Client hash: {}", hex::encode(client_hash));

    if server_hash == client_hash {
        info!("DETERMINISM VERIFIED: late delivery converged");
    } else {
        warn!("DETERMINISM FAILURE: hashes differ");
    }
    Ok(())
}

/// Repeating input pattern per slot: hold gas, tap turns now and then.
fn scripted_events(t: u32, slot: usize) -> Vec<PlayerEvent> {
    let phase = (t + slot as u32 * 17) % 240;
    match phase {
        0 => vec![PlayerEvent::Gas(true)],
        60 => vec![PlayerEvent::TurnRight],
        90 => vec![PlayerEvent::LeanLeft(true)],
        120 => vec![PlayerEvent::LeanLeft(false), PlayerEvent::Boost(true)],
        180 => vec![PlayerEvent::Boost(false), PlayerEvent::TurnLeft],
        _ => Vec::new(),
    }
}

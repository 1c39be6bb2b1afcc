//! Race Session Management
//!
//! Glue between participant connections and the rollback `Game`.
//! `RaceSession` owns the authoritative game on the server; `ClientSession`
//! owns a replica rebuilt from a bootstrap.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::game::input::PlayerEvent;
use crate::game::rollback::{EventOutcome, Game, GameError};
use crate::game::ship::format_race_time;
use crate::game::state::{ParticipantId, RacePhase, Slot};
use crate::game::turn::Turn;
use crate::network::protocol::{ClientMessage, ServerMessage};

/// Server wall clock in microseconds.
pub fn wall_clock_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Rejected by the game.
    #[error("Game error: {0}")]
    Game(#[from] GameError),

    /// Participant has no open channel.
    #[error("Participant not connected")]
    NotConnected,

    /// Participant's channel is closed.
    #[error("Channel closed")]
    ChannelClosed,

    /// Participant's outbound queue overflowed; they are waiting for a resync.
    #[error("Participant stalled")]
    Stalled,
}

// =============================================================================
// SERVER SIDE
// =============================================================================

/// Authoritative race plus the channels of everyone connected to it.
///
/// Outbound queues are bounded and never awaited: a participant whose queue
/// is full is marked stalled, gets nothing further, and is sent a fresh
/// bootstrap from `run_tick` once its queue drains.
pub struct RaceSession {
    game: Game,
    participants: BTreeMap<ParticipantId, mpsc::Sender<ServerMessage>>,
    stalled: BTreeSet<ParticipantId>,
    last_phase: RacePhase,
}

impl RaceSession {
    /// Wrap an authoritative game.
    pub fn new(game: Game) -> Self {
        let last_phase = game.current_turn().phase;
        Self {
            game,
            participants: BTreeMap::new(),
            stalled: BTreeSet::new(),
            last_phase,
        }
    }

    /// The authoritative game.
    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Connected participants (racing or not).
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Whether a participant's queue overflowed and is awaiting a resync.
    pub fn is_stalled(&self, participant: ParticipantId) -> bool {
        self.stalled.contains(&participant)
    }

    /// Register a participant's outbound channel.
    pub fn connect(&mut self, participant: ParticipantId, sender: mpsc::Sender<ServerMessage>) {
        debug!(participant = %participant.short(), "participant connected");
        self.participants.insert(participant, sender);
    }

    /// Drop a participant's channel and remove their ship.
    pub fn disconnect(&mut self, participant: ParticipantId) {
        self.leave(participant);
        self.participants.remove(&participant);
        self.stalled.remove(&participant);
        debug!(participant = %participant.short(), "participant disconnected");
    }

    /// Give a connected participant a slot.
    ///
    /// The joiner gets a bootstrap that already holds their spawn; everyone
    /// else gets the spawn as a server event.
    pub fn join(&mut self, participant: ParticipantId, username: String) -> Result<Slot, SessionError> {
        if !self.participants.contains_key(&participant) {
            return Err(SessionError::NotConnected);
        }

        let outcome = self.game.join(participant, username, false)?;
        match self.send_to(participant, ServerMessage::Bootstrap(Box::new(outcome.bootstrap))) {
            // Resynced from `run_tick` once the queue drains
            Ok(()) | Err(SessionError::Stalled) => {}
            Err(e) => return Err(e),
        }
        self.broadcast(
            ServerMessage::ServerEvent {
                event: outcome.event,
                target_turn_index: outcome.target_turn_index,
            },
            Some(participant),
        );

        Ok(outcome.slot)
    }

    /// Remove a participant's ship and tell everyone else.
    pub fn leave(&mut self, participant: ParticipantId) {
        if let Some((event, target)) = self.game.leave(participant) {
            self.broadcast(
                ServerMessage::ServerEvent {
                    event,
                    target_turn_index: target,
                },
                Some(participant),
            );
        }
    }

    /// Route one message from a participant.
    pub fn handle_message(
        &mut self,
        participant: ParticipantId,
        message: ClientMessage,
        now_us: i64,
    ) -> Result<(), SessionError> {
        match message {
            ClientMessage::Join { username } => {
                if let Err(e) = self.join(participant, username) {
                    warn!(participant = %participant.short(), error = %e, "join rejected");
                    self.send_to(participant, ServerMessage::error(e.to_string()))?;
                }
            }
            ClientMessage::PlayerEvents { events, target_turn_index } => {
                self.handle_player_events(participant, events, target_turn_index)?;
            }
            ClientMessage::Ping { client_time_us } => {
                self.send_to(
                    participant,
                    ServerMessage::Pong {
                        client_time_us,
                        server_now_us: now_us,
                    },
                )?;
            }
            ClientMessage::PlayerLost => {
                warn!(participant = %participant.short(), "participant lost sync");
                self.resync(participant)?;
            }
        }
        Ok(())
    }

    fn handle_player_events(
        &mut self,
        participant: ParticipantId,
        events: Vec<PlayerEvent>,
        target: u32,
    ) -> Result<(), SessionError> {
        let Some(slot) = self.game.slot_of(participant) else {
            debug!(participant = %participant.short(), "events from participant without slot");
            return Ok(());
        };

        match self.game.on_player_events(slot, &events, target) {
            Ok(EventOutcome::Changed) => {
                self.broadcast(
                    ServerMessage::PlayerEvents {
                        slot,
                        events,
                        target_turn_index: target,
                    },
                    Some(participant),
                );
            }
            Ok(EventOutcome::Unchanged) => {}
            Err(GameError::InvalidTurn { target, floor }) => {
                warn!(slot, target, floor, "events below retention floor, resyncing");
                self.resync(participant)?;
            }
            Err(e) => {
                warn!(slot, target, error = %e, "events rejected");
                self.send_to(participant, ServerMessage::error(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn resync_message(&self, participant: ParticipantId) -> ServerMessage {
        match self.game.slot_of(participant) {
            Some(slot) => ServerMessage::Bootstrap(Box::new(self.game.bootstrap(slot))),
            None => ServerMessage::error(GameError::UnknownParticipant.to_string()),
        }
    }

    /// Send a fresh bootstrap to a participant that holds a slot.
    fn resync(&mut self, participant: ParticipantId) -> Result<(), SessionError> {
        let message = self.resync_message(participant);
        self.stalled.remove(&participant);
        self.send_to(participant, message)
    }

    /// Advance the game to `now_us` and resync stalled participants whose
    /// queues have room again. Returns the current turn index.
    pub fn run_tick(&mut self, now_us: i64) -> u32 {
        let phase = self.game.tick(now_us).phase;

        if phase != self.last_phase {
            info!(from = ?self.last_phase, to = ?phase, turn = self.game.turn_index(), "race phase changed");
            if phase == RacePhase::ResultsScreen {
                self.log_results();
            }
            self.last_phase = phase;
        }

        let recovered: Vec<ParticipantId> = self
            .stalled
            .iter()
            .copied()
            .filter(|p| self.participants.get(p).is_some_and(|tx| tx.capacity() > 0))
            .collect();
        for participant in recovered {
            debug!(participant = %participant.short(), "queue drained, resyncing");
            if let Err(e) = self.resync(participant) {
                debug!(participant = %participant.short(), error = %e, "resync failed");
            }
        }

        self.game.turn_index()
    }

    fn log_results(&self) {
        let max_laps = self.game.config().max_laps;
        for (place, standing) in self.game.current_turn().standings(max_laps).iter().enumerate() {
            info!(
                place = place + 1,
                slot = standing.slot,
                username = %standing.username,
                finished = standing.finished,
                laps = standing.lap,
                total = %format_race_time(standing.total_time),
                best = %standing.best_lap.map(format_race_time).unwrap_or_else(|| "-".into()),
                "race result"
            );
        }
    }

    /// Queue a message without waiting. A full queue stalls the participant.
    fn send_to(&mut self, participant: ParticipantId, message: ServerMessage) -> Result<(), SessionError> {
        if self.stalled.contains(&participant) {
            return Err(SessionError::Stalled);
        }
        let sender = self
            .participants
            .get(&participant)
            .ok_or(SessionError::NotConnected)?;

        match sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(participant = %participant.short(), "outbound queue full, participant stalled");
                self.stalled.insert(participant);
                Err(SessionError::Stalled)
            }
            Err(TrySendError::Closed(_)) => Err(SessionError::ChannelClosed),
        }
    }

    /// Send to every connected participant except `except`.
    pub fn broadcast(&mut self, message: ServerMessage, except: Option<ParticipantId>) {
        let targets: Vec<ParticipantId> = self
            .participants
            .keys()
            .copied()
            .filter(|p| Some(*p) != except)
            .collect();
        for participant in targets {
            if let Err(e) = self.send_to(participant, message.clone()) {
                debug!(participant = %participant.short(), error = %e, "broadcast skipped");
            }
        }
    }
}

// =============================================================================
// CLIENT SIDE
// =============================================================================

/// Offset estimate between the server clock and the local clock.
///
/// Only the sample with the smallest round trip is kept: its midpoint
/// assumption has the least error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClockSync {
    best_rtt_us: Option<i64>,
    offset_us: i64,
}

impl ClockSync {
    /// Fresh estimator with a zero offset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a pong. Returns whether the sample replaced the estimate.
    pub fn record(&mut self, client_sent_us: i64, server_now_us: i64, client_received_us: i64) -> bool {
        let rtt = client_received_us - client_sent_us;
        if rtt < 0 {
            return false;
        }
        if self.best_rtt_us.is_some_and(|best| rtt >= best) {
            return false;
        }
        self.best_rtt_us = Some(rtt);
        self.offset_us = server_now_us + rtt / 2 - client_received_us;
        true
    }

    /// Server clock minus local clock (µs).
    pub fn offset_us(&self) -> i64 {
        self.offset_us
    }

    /// Smallest round trip seen so far (µs).
    pub fn best_rtt_us(&self) -> Option<i64> {
        self.best_rtt_us
    }
}

/// Participant's replica of the race.
#[derive(Debug)]
pub struct ClientSession {
    username: String,
    game: Option<Game>,
    slot: Option<Slot>,
    clock: ClockSync,
}

impl ClientSession {
    /// Not yet joined.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            game: None,
            slot: None,
            clock: ClockSync::new(),
        }
    }

    /// Message asking the server for a slot.
    pub fn join_message(&self) -> ClientMessage {
        ClientMessage::Join {
            username: self.username.clone(),
        }
    }

    /// Clock probe.
    pub fn ping(&self, now_us: i64) -> ClientMessage {
        ClientMessage::Ping { client_time_us: now_us }
    }

    /// Replica, once bootstrapped.
    pub fn game(&self) -> Option<&Game> {
        self.game.as_ref()
    }

    /// Slot assigned by the server.
    pub fn slot(&self) -> Option<Slot> {
        self.slot
    }

    /// Clock estimator.
    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    /// Apply a server message. May produce a reply.
    pub fn handle(&mut self, message: ServerMessage, now_us: i64) -> Option<ClientMessage> {
        match message {
            ServerMessage::Bootstrap(bootstrap) => {
                self.slot = Some(bootstrap.assigned_slot);
                match Game::from_bootstrap(*bootstrap, self.clock.offset_us()) {
                    Ok(game) => {
                        info!(slot = ?self.slot, turn = game.turn_index(), "bootstrapped");
                        self.game = Some(game);
                        None
                    }
                    Err(e) => {
                        warn!(error = %e, "unusable bootstrap");
                        self.lose_game()
                    }
                }
            }
            ServerMessage::PlayerEvents { slot, events, target_turn_index } => {
                let result = self.game.as_mut()?.on_player_events(slot, &events, target_turn_index);
                self.check(result)
            }
            ServerMessage::ServerEvent { event, target_turn_index } => {
                let result = self.game.as_mut()?.on_server_event(event, target_turn_index);
                self.check(result)
            }
            ServerMessage::Pong { client_time_us, server_now_us } => {
                if self.clock.record(client_time_us, server_now_us, now_us) {
                    let offset = self.clock.offset_us();
                    debug!(offset_us = offset, rtt_us = ?self.clock.best_rtt_us(), "clock offset updated");
                    if let Some(game) = self.game.as_mut() {
                        game.set_clock_offset(offset);
                    }
                }
                None
            }
            ServerMessage::Error { message } => {
                warn!(%message, "server error");
                None
            }
        }
    }

    fn check(&mut self, result: Result<EventOutcome, GameError>) -> Option<ClientMessage> {
        match result {
            Ok(_) => None,
            Err(GameError::InvalidTurn { target, floor }) => {
                warn!(target, floor, "remote events below retention floor, dropping game");
                self.lose_game()
            }
            Err(e) => {
                warn!(error = %e, "remote events rejected");
                None
            }
        }
    }

    fn lose_game(&mut self) -> Option<ClientMessage> {
        self.game = None;
        Some(ClientMessage::PlayerLost)
    }

    /// Apply local input to the current turn and build the message that
    /// carries it to the server.
    pub fn local_events(&mut self, events: Vec<PlayerEvent>) -> Option<ClientMessage> {
        let slot = self.slot?;
        let game = self.game.as_mut()?;
        let target = game.turn_index();

        match game.on_player_events(slot, &events, target) {
            Ok(EventOutcome::Changed) => Some(ClientMessage::PlayerEvents {
                events,
                target_turn_index: target,
            }),
            Ok(EventOutcome::Unchanged) => None,
            Err(e) => {
                warn!(error = %e, "local events rejected");
                None
            }
        }
    }

    /// Advance the replica to `now_us`.
    pub fn tick(&mut self, now_us: i64) -> Option<&Turn> {
        self.game.as_mut().map(|game| game.tick(now_us))
    }

    /// Extrapolated turn for rendering.
    pub fn render(&mut self, now_us: i64) -> Option<Turn> {
        self.game.as_mut().map(|game| game.fake_tick(now_us))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::ServerEvent;
    use crate::game::rollback::Authority;
    use crate::game::state::RaceConfig;
    use crate::game::track::Track;
    use crate::TICK_US;

    fn config() -> RaceConfig {
        RaceConfig {
            start_countdown_ticks: 0,
            ..Default::default()
        }
    }

    fn session() -> RaceSession {
        RaceSession::new(Game::new(Track::oval(), config(), Authority::Server, 0).with_color_seed(7))
    }

    fn pid(n: u8) -> ParticipantId {
        ParticipantId::new([n; 16])
    }

    fn connect(session: &mut RaceSession, n: u8) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(64);
        session.connect(pid(n), tx);
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_join_bootstraps_joiner_and_notifies_others() {
        let mut session = session();
        let mut a = connect(&mut session, 1);
        let mut b = connect(&mut session, 2);

        session.handle_message(pid(1), ClientMessage::Join { username: "a".into() }, 0).unwrap();

        let to_a = drain(&mut a);
        assert_eq!(to_a.len(), 1);
        assert!(matches!(&to_a[0], ServerMessage::Bootstrap(b) if b.assigned_slot == 0));

        let to_b = drain(&mut b);
        assert!(matches!(
            &to_b[..],
            [ServerMessage::ServerEvent { event: ServerEvent::SpawnPlayer { slot: 0, .. }, target_turn_index: 0 }]
        ));
    }

    #[test]
    fn test_join_requires_connection() {
        let mut session = session();
        let result = session.join(pid(9), "ghost".into());
        assert!(matches!(result, Err(SessionError::NotConnected)));
    }

    #[test]
    fn test_events_rebroadcast_with_slot() {
        let mut session = session();
        let _a = connect(&mut session, 1);
        let mut b = connect(&mut session, 2);
        session.join(pid(1), "a".into()).unwrap();
        drain(&mut b);

        let events = vec![PlayerEvent::Gas(true)];
        session
            .handle_message(pid(1), ClientMessage::PlayerEvents { events: events.clone(), target_turn_index: 0 }, 0)
            .unwrap();

        assert_eq!(
            drain(&mut b),
            vec![ServerMessage::PlayerEvents { slot: 0, events: events.clone(), target_turn_index: 0 }]
        );

        // Redelivery changes nothing and is not echoed
        session
            .handle_message(pid(1), ClientMessage::PlayerEvents { events, target_turn_index: 0 }, 0)
            .unwrap();
        assert!(drain(&mut b).is_empty());
    }

    #[test]
    fn test_events_without_slot_are_ignored() {
        let mut session = session();
        let mut a = connect(&mut session, 1);
        let mut b = connect(&mut session, 2);

        session
            .handle_message(pid(1), ClientMessage::PlayerEvents { events: vec![PlayerEvent::TurnLeft], target_turn_index: 0 }, 0)
            .unwrap();

        assert!(drain(&mut a).is_empty());
        assert!(drain(&mut b).is_empty());
        assert!(session.game().current_turn().log.is_empty());
    }

    #[test]
    fn test_stale_events_trigger_resync() {
        let game = Game::new(Track::oval(), config(), Authority::Server, 0).with_retention(4);
        let mut session = RaceSession::new(game);
        let mut a = connect(&mut session, 1);
        session.join(pid(1), "a".into()).unwrap();
        drain(&mut a);

        session.run_tick(10 * TICK_US);
        assert_eq!(session.game().retention_floor(), 6);

        session
            .handle_message(pid(1), ClientMessage::PlayerEvents { events: vec![PlayerEvent::Gas(true)], target_turn_index: 2 }, 0)
            .unwrap();

        let replies = drain(&mut a);
        assert!(matches!(&replies[..], [ServerMessage::Bootstrap(b)] if b.initial_turn_index == 6));
    }

    #[test]
    fn test_ping_pong() {
        let mut session = session();
        let mut a = connect(&mut session, 1);
        session.handle_message(pid(1), ClientMessage::Ping { client_time_us: 123 }, 456).unwrap();
        assert_eq!(
            drain(&mut a),
            vec![ServerMessage::Pong { client_time_us: 123, server_now_us: 456 }]
        );
    }

    #[test]
    fn test_disconnect_broadcasts_destroy() {
        let mut session = session();
        let _a = connect(&mut session, 1);
        let mut b = connect(&mut session, 2);
        session.join(pid(1), "a".into()).unwrap();
        session.run_tick(TICK_US);
        drain(&mut b);

        session.disconnect(pid(1));
        assert_eq!(session.participant_count(), 1);
        assert_eq!(
            drain(&mut b),
            vec![ServerMessage::ServerEvent { event: ServerEvent::destroy(0), target_turn_index: 1 }]
        );
    }

    #[test]
    fn test_client_follows_server() {
        let mut session = session();
        let mut a = connect(&mut session, 1);
        let mut b = connect(&mut session, 2);

        let mut client = ClientSession::new("a");
        session.handle_message(pid(1), client.join_message(), 0).unwrap();
        for msg in drain(&mut a) {
            assert!(client.handle(msg, 0).is_none());
        }
        assert_eq!(client.slot(), Some(0));

        // The client's own input travels to the server
        let outbound = client.local_events(vec![PlayerEvent::Gas(true)]).unwrap();
        session.handle_message(pid(1), outbound, 0).unwrap();

        // A second racer joins later; the first client hears about it
        session.run_tick(5 * TICK_US);
        session.join(pid(2), "b".into()).unwrap();
        drain(&mut b);
        for msg in drain(&mut a) {
            assert!(client.handle(msg, 0).is_none());
        }

        session.run_tick(20 * TICK_US);
        client.tick(20 * TICK_US);

        let game = client.game().unwrap();
        assert_eq!(game.turn_index(), session.game().turn_index());
        assert_eq!(game.current_hash(), session.game().current_hash());
        assert_eq!(game.current_turn().ship_count(), 2);

        // Rendering between ticks extrapolates without touching history
        let hash = session.game().current_hash();
        let frame = client.render(20 * TICK_US + TICK_US / 2).unwrap();
        assert_eq!(frame.ship_count(), 2);
        assert_ne!(frame.ship(0).unwrap().position, session.game().current_turn().ship(0).unwrap().position);
        assert_eq!(client.game().unwrap().current_hash(), hash);
    }

    #[test]
    fn test_full_queue_stalls_participant_without_blocking() {
        let mut session = session();
        let mut a = connect(&mut session, 1);
        let (tx, mut b) = mpsc::channel(1);
        session.connect(pid(2), tx);

        // b's bootstrap fills its queue
        session.join(pid(2), "b".into()).unwrap();
        assert!(!session.is_stalled(pid(2)));
        drain(&mut a);

        // The spawn broadcast for a overflows b; a's join still completes
        assert_eq!(session.join(pid(1), "a".into()).unwrap(), 1);
        assert!(session.is_stalled(pid(2)));
        assert!(matches!(&drain(&mut a)[..], [ServerMessage::Bootstrap(boot)] if boot.assigned_slot == 1));

        // Relayed events skip b while it is stalled
        session
            .handle_message(pid(1), ClientMessage::PlayerEvents { events: vec![PlayerEvent::Gas(true)], target_turn_index: 0 }, 0)
            .unwrap();
        session.run_tick(0);
        assert!(session.is_stalled(pid(2)));

        // Once b reads its queue, the next tick resyncs it from scratch
        assert!(matches!(&drain(&mut b)[..], [ServerMessage::Bootstrap(_)]));
        session.run_tick(TICK_US);
        assert!(!session.is_stalled(pid(2)));

        let resync = drain(&mut b);
        let [ServerMessage::Bootstrap(boot)] = &resync[..] else {
            panic!("expected a bootstrap, got {resync:?}");
        };
        assert_eq!(boot.assigned_slot, 0);
        let replica = Game::from_bootstrap((**boot).clone(), 0).unwrap();
        assert_eq!(replica.current_hash(), session.game().current_hash());
    }

    #[test]
    fn test_client_drops_game_on_invalid_turn() {
        let mut session = session();
        let mut a = connect(&mut session, 1);
        session.join(pid(1), "a".into()).unwrap();

        let mut client = ClientSession::new("a");
        for msg in drain(&mut a) {
            client.handle(msg, 0);
        }
        client.tick(200 * TICK_US);
        let floor = client.game().unwrap().retention_floor();

        let reply = client.handle(
            ServerMessage::PlayerEvents { slot: 1, events: vec![PlayerEvent::TurnLeft], target_turn_index: floor - 1 },
            0,
        );
        assert_eq!(reply, Some(ClientMessage::PlayerLost));
        assert!(client.game().is_none());

        // Messages before the next bootstrap are ignored
        assert!(client.handle(ServerMessage::ServerEvent { event: ServerEvent::destroy(0), target_turn_index: 0 }, 0).is_none());
    }

    #[test]
    fn test_clock_sync_keeps_lowest_rtt() {
        let mut clock = ClockSync::new();
        assert!(clock.record(1_000, 50_000, 1_200));
        assert_eq!(clock.offset_us(), 50_000 + 100 - 1_200);

        // Slower sample ignored
        assert!(!clock.record(2_000, 90_000, 2_600));
        assert_eq!(clock.best_rtt_us(), Some(200));

        // Faster sample wins
        assert!(clock.record(3_000, 52_000, 3_050));
        assert_eq!(clock.offset_us(), 52_000 + 25 - 3_050);

        // Negative round trips are nonsense
        assert!(!clock.record(5_000, 0, 4_000));
    }
}

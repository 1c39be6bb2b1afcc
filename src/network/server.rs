//! WebSocket Game Server
//!
//! Async WebSocket server for race participants. One task per connection,
//! one task ticking the shared race at 60 Hz.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::game::rollback::Game;
use crate::game::state::ParticipantId;
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::session::{wall_clock_us, RaceSession, SessionError};
use crate::TICK_US;

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    session: Arc<RwLock<RaceSession>>,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Serve an authoritative game.
    pub fn new(config: ServerConfig, game: Game) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            session: Arc::new(RwLock::new(RaceSession::new(game))),
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Shared race session.
    pub fn session(&self) -> Arc<RwLock<RaceSession>> {
        self.session.clone()
    }

    /// Sender that stops the server when signalled.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run until shutdown.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(version = %self.config.version, "Race server listening");

        let tick_session = self.session.clone();
        let mut tick_shutdown = self.shutdown_tx.subscribe();
        let tick_handle = tokio::spawn(async move {
            Self::run_tick_loop(tick_session, &mut tick_shutdown).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.load(Ordering::Relaxed) >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        tick_handle.abort();
        Ok(())
    }

    /// Advance the race on a fixed cadence. Late wakeups catch up inside
    /// `Game::tick`, which steps as many turns as the clock allows.
    async fn run_tick_loop(session: Arc<RwLock<RaceSession>>, shutdown: &mut broadcast::Receiver<()>) {
        let mut ticker = interval(Duration::from_micros(TICK_US as u64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    session.write().await.run_tick(wall_clock_us());
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let session = self.session.clone();
        let connections = self.connections.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };
            connections.fetch_add(1, Ordering::Relaxed);

            let participant = ParticipantId::random();
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(256);

            session.write().await.connect(participant, msg_tx.clone());
            debug!("Client {} is participant {}", addr, participant.to_uuid_string());

            // Outbound: JSON text frames
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let decoded = match msg {
                            Some(Ok(Message::Text(text))) => {
                                ClientMessage::from_json(&text).map_err(|e| e.to_string())
                            }
                            Some(Ok(Message::Binary(data))) => {
                                ClientMessage::from_bytes(&data).map_err(|e| e.to_string())
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        match decoded {
                            Ok(client_msg) => {
                                let result = session
                                    .write()
                                    .await
                                    .handle_message(participant, client_msg, wall_clock_us());
                                if let Err(e) = result {
                                    debug!("Message from {} failed: {}", addr, e);
                                }
                            }
                            Err(e) => {
                                debug!("Invalid message from {}: {}", addr, e);
                                let _ = msg_tx.try_send(ServerMessage::error("Invalid message format"));
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.try_send(ServerMessage::error("Server shutting down"));
                        break;
                    }
                }
            }

            sender_task.abort();
            session.write().await.disconnect(participant);
            connections.fetch_sub(1, Ordering::Relaxed);
            info!("Client {} cleaned up", addr);
        });
    }
}

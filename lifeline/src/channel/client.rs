//! Realtime channel client: one logical push connection per session.
//!
//! The handler registry and the joined-room set live in the client, not in
//! any single connection. A reconnect therefore replays every room join
//! before the status flips back to `Connected`, and no subscriber registered
//! before a disconnect is dropped afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::ChannelConfig;
use super::event::{EventKind, RealtimeEvent, Room};
use super::transport::{Connection, Transport, WireCommand};
use crate::error::AlertError;

/// Connectivity as seen by dependents. Anything other than `Connected`
/// means push delivery cannot be relied on and polling is the backstop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Reconnecting,
    Offline,
}

enum ClientCommand {
    Subscribe {
        kinds: Vec<EventKind>,
        tx: mpsc::Sender<RealtimeEvent>,
    },
    Join(Room),
    Emit(RealtimeEvent),
    Reconnect,
    Shutdown,
}

/// Cloneable handle to the channel client task.
#[derive(Clone)]
pub struct ChannelHandle {
    tx: mpsc::Sender<ClientCommand>,
    status_rx: watch::Receiver<ConnectionStatus>,
    subscriber_buffer: usize,
}

impl ChannelHandle {
    /// Register a handler for the given event kinds. The registration
    /// survives reconnects for as long as the returned receiver is alive.
    pub async fn subscribe(
        &self,
        kinds: &[EventKind],
    ) -> Result<mpsc::Receiver<RealtimeEvent>, AlertError> {
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        self.tx
            .send(ClientCommand::Subscribe {
                kinds: kinds.to_vec(),
                tx,
            })
            .await
            .map_err(|_| AlertError::ChannelClosed)?;
        Ok(rx)
    }

    /// Join a room; membership is replayed on every reconnect.
    pub async fn join(&self, room: Room) -> Result<(), AlertError> {
        self.tx
            .send(ClientCommand::Join(room))
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }

    /// Emit an event upstream. Dropped silently while disconnected.
    pub async fn emit(&self, event: RealtimeEvent) -> Result<(), AlertError> {
        self.tx
            .send(ClientCommand::Emit(event))
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.status_rx.borrow() == ConnectionStatus::Connected
    }

    /// Restart the reconnect budget after the client went offline.
    pub async fn reconnect(&self) -> Result<(), AlertError> {
        self.tx
            .send(ClientCommand::Reconnect)
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<(), AlertError> {
        self.tx
            .send(ClientCommand::Shutdown)
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }
}

pub struct ChannelClient {
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    cmd_rx: mpsc::Receiver<ClientCommand>,
    status_tx: watch::Sender<ConnectionStatus>,
    registry: HashMap<EventKind, Vec<mpsc::Sender<RealtimeEvent>>>,
    rooms: HashSet<Room>,
}

impl ChannelClient {
    /// Spawn the client task and return its handle.
    pub fn spawn(transport: Arc<dyn Transport>, config: ChannelConfig) -> (ChannelHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Reconnecting);

        let handle = ChannelHandle {
            tx: cmd_tx,
            status_rx,
            subscriber_buffer: config.subscriber_buffer,
        };

        let client = ChannelClient {
            transport,
            config,
            cmd_rx,
            status_tx,
            registry: HashMap::new(),
            rooms: HashSet::new(),
        };

        let task = tokio::spawn(client.run());
        (handle, task)
    }

    async fn run(mut self) {
        let mut attempts: u32 = 0;
        info!("channel client started");

        'outer: loop {
            match self.transport.connect().await {
                Ok(conn) => {
                    attempts = 0;
                    if self.drive(conn).await {
                        break 'outer;
                    }
                    let _ = self.status_tx.send(ConnectionStatus::Reconnecting);
                }
                Err(e) => {
                    warn!(error = %e, "connect failed");
                }
            }

            attempts += 1;
            if attempts >= self.config.reconnect_attempts {
                warn!(attempts, "reconnect budget exhausted, going offline");
                let _ = self.status_tx.send(ConnectionStatus::Offline);
                // Stay offline, still tracking registrations, until an
                // explicit reconnect or shutdown arrives.
                loop {
                    match self.cmd_rx.recv().await {
                        None | Some(ClientCommand::Shutdown) => break 'outer,
                        Some(ClientCommand::Reconnect) => {
                            attempts = 0;
                            let _ = self.status_tx.send(ConnectionStatus::Reconnecting);
                            break;
                        }
                        Some(cmd) => self.apply_disconnected(cmd),
                    }
                }
                continue;
            }

            // Delay before the next attempt, still serving commands.
            let delay = tokio::time::sleep(self.config.reconnect_delay());
            tokio::pin!(delay);
            loop {
                tokio::select! {
                    _ = &mut delay => break,
                    cmd = self.cmd_rx.recv() => match cmd {
                        None | Some(ClientCommand::Shutdown) => break 'outer,
                        Some(ClientCommand::Reconnect) => {
                            attempts = 0;
                            break;
                        }
                        Some(cmd) => self.apply_disconnected(cmd),
                    },
                }
            }
        }

        let _ = self.status_tx.send(ConnectionStatus::Offline);
        info!("channel client stopped");
    }

    /// Serve one live connection. Returns true when the client should exit.
    async fn drive(&mut self, mut conn: Connection) -> bool {
        // Replay room membership before anyone observes `Connected`.
        for room in &self.rooms {
            if conn
                .commands
                .send(WireCommand::Join(room.clone()))
                .await
                .is_err()
            {
                warn!("connection dropped during room replay");
                return false;
            }
        }
        let _ = self.status_tx.send(ConnectionStatus::Connected);
        debug!(rooms = self.rooms.len(), "connected, rooms replayed");

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(ClientCommand::Shutdown) => return true,
                    Some(ClientCommand::Reconnect) => {}
                    Some(ClientCommand::Subscribe { kinds, tx }) => self.add_subscriber(kinds, tx),
                    Some(ClientCommand::Join(room)) => {
                        let fresh = self.rooms.insert(room.clone());
                        if fresh && conn.commands.send(WireCommand::Join(room)).await.is_err() {
                            return false;
                        }
                    }
                    Some(ClientCommand::Emit(event)) => {
                        if conn.commands.send(WireCommand::Emit(event)).await.is_err() {
                            return false;
                        }
                    }
                },
                event = conn.events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        warn!("push connection lost");
                        return false;
                    }
                },
            }
        }
    }

    /// Commands still honored while no connection is live.
    fn apply_disconnected(&mut self, cmd: ClientCommand) {
        match cmd {
            ClientCommand::Subscribe { kinds, tx } => self.add_subscriber(kinds, tx),
            ClientCommand::Join(room) => {
                self.rooms.insert(room);
            }
            ClientCommand::Emit(event) => {
                debug!(kind = ?event.kind(), "emit dropped while disconnected");
            }
            // Handled by the caller.
            ClientCommand::Reconnect | ClientCommand::Shutdown => {}
        }
    }

    fn add_subscriber(&mut self, kinds: Vec<EventKind>, tx: mpsc::Sender<RealtimeEvent>) {
        for kind in kinds {
            self.registry.entry(kind).or_default().push(tx.clone());
        }
    }

    async fn dispatch(&mut self, event: RealtimeEvent) {
        let Some(subs) = self.registry.get_mut(&event.kind()) else {
            return;
        };
        // Prune subscribers whose receiver is gone.
        let mut open = Vec::with_capacity(subs.len());
        for tx in subs.drain(..) {
            if tx.send(event.clone()).await.is_ok() {
                open.push(tx);
            }
        }
        *subs = open;
    }
}

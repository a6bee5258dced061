//! In-memory hub: transport plus server-side room router.
//!
//! Used by the in-memory alert service, the simulator binary, and every
//! reconnect test. `disconnect_all` force-drops live connections so clients
//! observe exactly what a network partition looks like.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::event::{RealtimeEvent, Room};
use super::transport::{Connection, Transport, WireCommand};
use crate::error::AlertError;

const CONNECTION_BUFFER: usize = 64;

struct ConnEntry {
    tx: mpsc::Sender<RealtimeEvent>,
    rooms: HashSet<Room>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    conns: HashMap<u64, ConnEntry>,
}

#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner::default())),
        }
    }

    /// Deliver an event to every connection currently in `room`.
    pub async fn broadcast(&self, room: &Room, event: RealtimeEvent) {
        let targets: Vec<mpsc::Sender<RealtimeEvent>> = {
            let inner = self.inner.lock().await;
            inner
                .conns
                .values()
                .filter(|c| c.rooms.contains(room))
                .map(|c| c.tx.clone())
                .collect()
        };

        debug!(?room, kind = ?event.kind(), targets = targets.len(), "hub broadcast");
        for tx in targets {
            let _ = tx.send(event.clone()).await;
        }
    }

    /// Force-drop every live connection, as a network partition would.
    pub async fn disconnect_all(&self) {
        let mut inner = self.inner.lock().await;
        let dropped = inner.conns.len();
        inner.conns.clear();
        debug!(dropped, "hub dropped all connections");
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.conns.len()
    }

    /// Number of connections currently joined to `room`.
    pub async fn members(&self, room: &Room) -> usize {
        self.inner
            .lock()
            .await
            .conns
            .values()
            .filter(|c| c.rooms.contains(room))
            .count()
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalHub {
    async fn connect(&self) -> Result<Connection, AlertError> {
        let (event_tx, event_rx) = mpsc::channel(CONNECTION_BUFFER);
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WireCommand>(CONNECTION_BUFFER);

        let conn_id = {
            let mut inner = self.inner.lock().await;
            inner.next_id += 1;
            let id = inner.next_id;
            inner.conns.insert(
                id,
                ConnEntry {
                    tx: event_tx,
                    rooms: HashSet::new(),
                },
            );
            id
        };

        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    WireCommand::Join(room) => {
                        let mut inner = hub.inner.lock().await;
                        match inner.conns.get_mut(&conn_id) {
                            Some(entry) => {
                                entry.rooms.insert(room);
                            }
                            // Connection was force-dropped; nothing to join.
                            None => break,
                        }
                    }
                    WireCommand::Emit(event) => {
                        if let Some(room) = event.default_room() {
                            hub.broadcast(&room, event).await;
                        }
                    }
                }
            }
            hub.inner.lock().await.conns.remove(&conn_id);
        });

        Ok(Connection {
            events: event_rx,
            commands: cmd_tx,
        })
    }
}

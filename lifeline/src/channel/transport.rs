//! Transport seam for the realtime channel.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::event::{RealtimeEvent, Room};
use crate::error::AlertError;

/// Client-to-server messages on a live connection.
#[derive(Debug, Clone)]
pub enum WireCommand {
    Join(Room),
    Emit(RealtimeEvent),
}

/// One live push connection. The event stream ending means the connection
/// dropped; the client decides whether to reconnect.
pub struct Connection {
    pub events: mpsc::Receiver<RealtimeEvent>,
    pub commands: mpsc::Sender<WireCommand>,
}

/// Connection factory. Each `connect` call produces a fresh connection with
/// no carried-over room membership; replaying state is the client's job.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<Connection, AlertError>;
}

//! Per-user session wiring.
//!
//! A session owns one channel client and the room memberships that come
//! with the user's role. Closing it tears the client down; closing twice
//! is fine.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::channel::{ChannelClient, ChannelConfig, ChannelHandle, Room, Transport};
use crate::error::AlertError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Requester,
    Responder,
}

/// One authenticated user's connection to the coordination layer.
pub struct Session {
    user_id: String,
    role: Role,
    channel: ChannelHandle,
    task: JoinHandle<()>,
}

impl Session {
    /// Connect and join the user's personal room.
    pub async fn open(
        user_id: impl Into<String>,
        role: Role,
        transport: Arc<dyn Transport>,
        config: ChannelConfig,
    ) -> Result<Session, AlertError> {
        let user_id = user_id.into();
        let (channel, task) = ChannelClient::spawn(transport, config);
        channel.join(Room::Personal(user_id.clone())).await?;
        if role == Role::Responder {
            channel.join(Room::ResponderPool).await?;
        }
        info!(%user_id, ?role, "session opened");

        Ok(Session {
            user_id,
            role,
            channel,
            task,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn channel(&self) -> ChannelHandle {
        self.channel.clone()
    }

    /// Tear the session down. Idempotent: a second close is a no-op.
    pub async fn close(&self) {
        if self.task.is_finished() {
            return;
        }
        let _ = self.channel.shutdown().await;
        info!(user_id = %self.user_id, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.task.abort();
    }
}

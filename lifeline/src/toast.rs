//! Transient alert notifications with automatic expiry.
//!
//! Toasts are a presentation concern layered over the responder feed: a
//! toast disappearing after its TTL says nothing about the alert itself,
//! which stays in the feed until it closes or is declined.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::AlertError;
use crate::model::AlertSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToastConfig {
    /// How long a toast stays visible, in milliseconds.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_ttl_ms() -> u64 {
    15_000
}

impl Default for ToastConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
        }
    }
}

impl ToastConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// One visible notification.
#[derive(Debug, Clone)]
pub struct PendingToast {
    pub id: u64,
    pub alert: AlertSummary,
    pub expires_at: DateTime<Utc>,
}

enum ToastCommand {
    Push(AlertSummary),
    Dismiss(u64),
    Expire(u64),
    Shutdown,
}

/// Cloneable handle to the toast manager task.
#[derive(Clone)]
pub struct ToastHandle {
    tx: mpsc::Sender<ToastCommand>,
    view_rx: watch::Receiver<Vec<PendingToast>>,
}

impl ToastHandle {
    pub async fn push(&self, alert: AlertSummary) -> Result<(), AlertError> {
        self.tx
            .send(ToastCommand::Push(alert))
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }

    /// Dismiss a toast early. A no-op when it already expired.
    pub async fn dismiss(&self, id: u64) -> Result<(), AlertError> {
        self.tx
            .send(ToastCommand::Dismiss(id))
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }

    pub fn toasts(&self) -> watch::Receiver<Vec<PendingToast>> {
        self.view_rx.clone()
    }

    pub async fn shutdown(&self) -> Result<(), AlertError> {
        self.tx
            .send(ToastCommand::Shutdown)
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }
}

pub struct ToastManager {
    config: ToastConfig,
    cmd_rx: mpsc::Receiver<ToastCommand>,
    // Kept so expiry timers can message the manager back.
    cmd_tx: mpsc::Sender<ToastCommand>,
    view_tx: watch::Sender<Vec<PendingToast>>,
    toasts: Vec<PendingToast>,
    next_id: u64,
}

impl ToastManager {
    pub fn spawn(config: ToastConfig) -> (ToastHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (view_tx, view_rx) = watch::channel(Vec::new());

        let handle = ToastHandle {
            tx: cmd_tx.clone(),
            view_rx,
        };
        let manager = ToastManager {
            config,
            cmd_rx,
            cmd_tx,
            view_tx,
            toasts: Vec::new(),
            next_id: 0,
        };

        let task = tokio::spawn(manager.run());
        (handle, task)
    }

    async fn run(mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                ToastCommand::Push(alert) => {
                    self.next_id += 1;
                    let id = self.next_id;
                    debug!(id, alert_id = %alert.alert_id, "toast shown");
                    self.toasts.push(PendingToast {
                        id,
                        alert,
                        expires_at: Utc::now()
                            + chrono::Duration::milliseconds(self.config.ttl_ms as i64),
                    });
                    self.publish();

                    let tx = self.cmd_tx.clone();
                    let ttl = self.config.ttl();
                    tokio::spawn(async move {
                        tokio::time::sleep(ttl).await;
                        let _ = tx.send(ToastCommand::Expire(id)).await;
                    });
                }
                ToastCommand::Dismiss(id) | ToastCommand::Expire(id) => {
                    let before = self.toasts.len();
                    self.toasts.retain(|t| t.id != id);
                    if self.toasts.len() != before {
                        self.publish();
                    }
                }
                ToastCommand::Shutdown => break,
            }
        }
    }

    fn publish(&self) {
        let _ = self.view_tx.send(self.toasts.clone());
    }
}

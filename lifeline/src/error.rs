//! Error taxonomy for the alert coordination core.

use thiserror::Error;

/// Errors surfaced by the coordination layer.
///
/// Background loops (status poll, location push, reconcile fetch) catch,
/// log, and retry; user-initiated actions surface these to the caller with
/// state left unchanged so the action can be retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlertError {
    #[error("location unavailable: permission denied or no fix within the wait budget")]
    LocationUnavailable,

    #[error("network failure: {0}")]
    Network(String),

    #[error("alert {alert_id} already has a responder")]
    Conflict { alert_id: String },

    #[error("alert {alert_id} is no longer open")]
    StaleState { alert_id: String },

    #[error("channel closed")]
    ChannelClosed,
}

impl AlertError {
    pub fn network(message: impl Into<String>) -> Self {
        AlertError::Network(message.into())
    }

    pub fn stale(alert_id: impl Into<String>) -> Self {
        AlertError::StaleState {
            alert_id: alert_id.into(),
        }
    }

    /// Check if this error is worth retrying on the next background tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AlertError::Network(_))
    }

    /// Check if this is a lost accept race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, AlertError::Conflict { .. })
    }
}

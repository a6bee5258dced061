//! Requester-side lifecycle tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Countdown length before an alert actually fires.
    #[serde(default = "default_countdown_ticks")]
    pub countdown_ticks: u32,

    /// Length of one countdown tick in milliseconds.
    #[serde(default = "default_countdown_tick_ms")]
    pub countdown_tick_ms: u64,

    /// Status poll cadence while an alert is open, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Live location push cadence, in milliseconds.
    #[serde(default = "default_push_interval_ms")]
    pub push_interval_ms: u64,

    /// How long to wait for a position fix before falling back, in
    /// milliseconds.
    #[serde(default = "default_location_timeout_ms")]
    pub location_timeout_ms: u64,

    /// Stream live location while the alert is open.
    #[serde(default = "default_live_location")]
    pub live_location: bool,
}

fn default_countdown_ticks() -> u32 {
    3
}

fn default_countdown_tick_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_push_interval_ms() -> u64 {
    10_000
}

fn default_location_timeout_ms() -> u64 {
    5000
}

fn default_live_location() -> bool {
    true
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            countdown_ticks: default_countdown_ticks(),
            countdown_tick_ms: default_countdown_tick_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            push_interval_ms: default_push_interval_ms(),
            location_timeout_ms: default_location_timeout_ms(),
            live_location: default_live_location(),
        }
    }
}

impl LifecycleConfig {
    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms)
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_millis(self.location_timeout_ms)
    }
}

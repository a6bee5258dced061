//! Responder-side tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// Reconcile cadence while on duty, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Radius within which alerts are surfaced, in kilometres.
    #[serde(default = "default_radius_km")]
    pub radius_km: f64,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_radius_km() -> f64 {
    10.0
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            radius_km: default_radius_km(),
        }
    }
}

impl ResponderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

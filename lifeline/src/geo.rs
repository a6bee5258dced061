//! Geolocation source seam.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::AlertError;
use crate::model::{Coordinates, LocationSample};

/// A device capability producing position samples on demand or continuously.
#[async_trait]
pub trait LocationSource: Send + Sync {
    /// The freshest position available, waiting at most `timeout` for a fix.
    async fn current_position(&self, timeout: Duration) -> Result<Coordinates, AlertError>;

    /// Continuous position feed. The receiver doubles as the
    /// "latest known position" cell: single writer (the source), and each
    /// consumer reads the most recent value without queueing.
    fn subscribe(&self) -> watch::Receiver<Option<LocationSample>>;
}

/// Scriptable location source for tests and the simulator.
pub struct SimulatedLocationSource {
    tx: watch::Sender<Option<LocationSample>>,
}

impl SimulatedLocationSource {
    /// A source with no fix yet; `current_position` waits for one.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn with_position(coords: Coordinates) -> Self {
        let source = Self::new();
        source.set_position(coords);
        source
    }

    pub fn set_position(&self, coords: Coordinates) {
        let _ = self.tx.send(Some(LocationSample::now(coords)));
    }

    /// Drop the fix, as if location permission was revoked.
    pub fn clear(&self) {
        let _ = self.tx.send(None);
    }

    /// Random walk within `max_deg` degrees of the current fix (simulator).
    pub fn drift(&self, max_deg: f64) {
        use rand::Rng;

        let current = self.tx.borrow().clone();
        if let Some(sample) = current {
            let mut rng = rand::rng();
            let coords = Coordinates::new(
                sample.coords.latitude + rng.random_range(-max_deg..=max_deg),
                sample.coords.longitude + rng.random_range(-max_deg..=max_deg),
            );
            self.set_position(coords);
        }
    }
}

impl Default for SimulatedLocationSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationSource for SimulatedLocationSource {
    async fn current_position(&self, timeout: Duration) -> Result<Coordinates, AlertError> {
        let mut rx = self.tx.subscribe();
        if let Some(sample) = rx.borrow().clone() {
            return Ok(sample.coords);
        }

        let wait = async {
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                if let Some(sample) = rx.borrow().clone() {
                    return Some(sample.coords);
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Some(coords)) => Ok(coords),
            _ => Err(AlertError::LocationUnavailable),
        }
    }

    fn subscribe(&self) -> watch::Receiver<Option<LocationSample>> {
        self.tx.subscribe()
    }
}

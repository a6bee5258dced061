//! Live location streaming for an active alert.
//!
//! A background task samples the device position on a fixed cadence and
//! pushes it to the alert service, which fans it out on the per-alert room.
//! The streamer must stop pushing the moment the alert closes, whichever of
//! the two paths notices first: an explicit `stop` from the lifecycle
//! controller, or the service rejecting a push for a closed alert.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::AlertError;
use crate::geo::LocationSource;
use crate::model::LocationSample;
use crate::service::AlertService;

/// Handle to one alert's push loop.
pub struct LocationStreamer {
    alert_id: String,
    stopped: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    pushes: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl LocationStreamer {
    /// Spawn the push loop for `alert_id`.
    pub fn start(
        alert_id: String,
        service: Arc<dyn AlertService>,
        source: Arc<dyn LocationSource>,
        push_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pushes = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(run_push_loop(
            alert_id.clone(),
            service,
            source,
            push_interval,
            shutdown_rx,
            Arc::clone(&pushes),
        ));

        Self {
            alert_id,
            stopped: AtomicBool::new(false),
            shutdown_tx,
            pushes,
            task,
        }
    }

    /// Stop the push loop. Safe to call more than once; later calls are
    /// no-ops.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(alert_id = %self.alert_id, "location streaming stopped");
        let _ = self.shutdown_tx.send(true);
    }

    /// Number of samples successfully pushed so far.
    pub fn pushes_sent(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for LocationStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_push_loop(
    alert_id: String,
    service: Arc<dyn AlertService>,
    source: Arc<dyn LocationSource>,
    push_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    pushes: Arc<AtomicU64>,
) {
    let position_rx = source.subscribe();
    let mut interval = tokio::time::interval(push_interval);
    // The first tick fires immediately; the alert was just created with a
    // fresh position, so skip it.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let sample: Option<LocationSample> = position_rx.borrow().clone();
                let Some(sample) = sample else {
                    // No fix right now; try again next tick.
                    continue;
                };
                match service.update_location(&alert_id, sample).await {
                    Ok(()) => {
                        pushes.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(AlertError::StaleState { .. }) => {
                        debug!(%alert_id, "alert closed, ending push loop");
                        return;
                    }
                    Err(e) if e.is_retryable() => {
                        warn!(%alert_id, error = %e, "location push failed, will retry");
                    }
                    Err(e) => {
                        warn!(%alert_id, error = %e, "location push rejected, ending push loop");
                        return;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
}

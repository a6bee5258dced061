//! Requester-side SOS lifecycle.
//!
//! One controller per session drives the whole arc: countdown with
//! toggle-to-cancel, bounded location acquisition, submission, then a dual
//! sync while the alert is open. Push events and poll results both funnel
//! through the status lattice, so whichever arrives first wins and the
//! other becomes a no-op.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval};
use tracing::{debug, info, warn};

use super::config::LifecycleConfig;
use crate::channel::{ChannelHandle, EventKind, RealtimeEvent};
use crate::error::AlertError;
use crate::geo::LocationSource;
use crate::model::{AlertKind, AlertStatus, ResponderAssignment};
use crate::service::{AlertService, CreateAlertRequest};
use crate::streaming::LocationStreamer;
use crate::util::{recv_opt, tick_opt};

/// Where the requester's session is in the SOS arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SosPhase {
    #[default]
    Idle,
    /// Ticks remaining before the alert fires.
    Countdown(u32),
    Submitting,
    Active,
    Responding,
    Resolved,
    Cancelled,
}

impl SosPhase {
    /// A new SOS may start from rest or from a finished previous one.
    pub fn can_trigger(self) -> bool {
        matches!(self, SosPhase::Idle | SosPhase::Resolved | SosPhase::Cancelled)
    }
}

/// The responder en route, as shown to the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespondingSummary {
    pub volunteer_name: String,
    pub eta_minutes: Option<u32>,
}

/// Published view of the controller's state.
#[derive(Debug, Clone, Default)]
pub struct LifecycleView {
    pub phase: SosPhase,
    pub alert_id: Option<String>,
    pub responder: Option<RespondingSummary>,
    pub volunteers_notified: Option<usize>,
    /// Location samples pushed so far, as of the last state change.
    pub location_pushes: u64,
    pub last_error: Option<String>,
}

enum SosCommand {
    Trigger,
    Cancel {
        reply: oneshot::Sender<Result<(), AlertError>>,
    },
    Resolve {
        notes: Option<String>,
        reply: oneshot::Sender<Result<(), AlertError>>,
    },
    Shutdown,
}

/// Cloneable handle to a requester's lifecycle controller.
#[derive(Clone)]
pub struct SosHandle {
    tx: mpsc::Sender<SosCommand>,
    view_rx: watch::Receiver<LifecycleView>,
}

impl SosHandle {
    /// Press the SOS button. Starts the countdown, or cancels it when one
    /// is already running.
    pub async fn trigger(&self) -> Result<(), AlertError> {
        self.tx
            .send(SosCommand::Trigger)
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }

    /// Cancel the open alert (or abort a running countdown).
    pub async fn cancel(&self) -> Result<(), AlertError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SosCommand::Cancel { reply })
            .await
            .map_err(|_| AlertError::ChannelClosed)?;
        rx.await.map_err(|_| AlertError::ChannelClosed)?
    }

    /// Mark the open alert handled.
    pub async fn resolve(&self, notes: Option<String>) -> Result<(), AlertError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SosCommand::Resolve { notes, reply })
            .await
            .map_err(|_| AlertError::ChannelClosed)?;
        rx.await.map_err(|_| AlertError::ChannelClosed)?
    }

    pub fn view(&self) -> watch::Receiver<LifecycleView> {
        self.view_rx.clone()
    }

    pub async fn shutdown(&self) -> Result<(), AlertError> {
        self.tx
            .send(SosCommand::Shutdown)
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }
}

struct ActiveAlert {
    id: String,
    status: AlertStatus,
    streamer: Option<LocationStreamer>,
}

pub struct SosController {
    user_id: String,
    user_name: String,
    kind: AlertKind,
    message: String,
    config: LifecycleConfig,
    service: Arc<dyn AlertService>,
    source: Arc<dyn LocationSource>,
    channel: ChannelHandle,
    cmd_rx: mpsc::Receiver<SosCommand>,
    view_tx: watch::Sender<LifecycleView>,
    phase: SosPhase,
    alert: Option<ActiveAlert>,
    responder: Option<RespondingSummary>,
    volunteers_notified: Option<usize>,
    last_error: Option<String>,
}

impl SosController {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        kind: AlertKind,
        message: impl Into<String>,
        service: Arc<dyn AlertService>,
        source: Arc<dyn LocationSource>,
        channel: ChannelHandle,
        config: LifecycleConfig,
    ) -> (SosHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (view_tx, view_rx) = watch::channel(LifecycleView::default());

        let handle = SosHandle {
            tx: cmd_tx,
            view_rx,
        };
        let controller = SosController {
            user_id: user_id.into(),
            user_name: user_name.into(),
            kind,
            message: message.into(),
            config,
            service,
            source,
            channel,
            cmd_rx,
            view_tx,
            phase: SosPhase::Idle,
            alert: None,
            responder: None,
            volunteers_notified: None,
            last_error: None,
        };

        let task = tokio::spawn(controller.run());
        (handle, task)
    }

    async fn run(mut self) {
        // Acceptance may arrive by push before the next poll.
        let mut events = self
            .channel
            .subscribe(&[EventKind::VolunteerResponding])
            .await
            .ok();

        let mut countdown: Option<Interval> = None;
        let mut remaining: u32 = 0;
        let mut poll: Option<Interval> = None;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(SosCommand::Shutdown) => break,
                    Some(SosCommand::Trigger) => {
                        self.on_trigger(&mut countdown, &mut remaining);
                    }
                    Some(SosCommand::Cancel { reply }) => {
                        let result = self.on_cancel(&mut countdown, &mut poll).await;
                        let _ = reply.send(result);
                    }
                    Some(SosCommand::Resolve { notes, reply }) => {
                        let result = self.on_resolve(notes, &mut poll).await;
                        let _ = reply.send(result);
                    }
                },
                _ = tick_opt(&mut countdown) => {
                    remaining = remaining.saturating_sub(1);
                    if remaining == 0 {
                        countdown = None;
                        self.submit(&mut poll).await;
                    } else {
                        self.phase = SosPhase::Countdown(remaining);
                        self.publish();
                    }
                }
                _ = tick_opt(&mut poll) => {
                    self.on_poll(&mut poll).await;
                }
                event = recv_opt(&mut events) => match event {
                    Some(event) => self.on_event(event),
                    None => events = None,
                },
            }
        }

        self.stop_streaming();
        debug!(user_id = %self.user_id, "lifecycle controller stopped");
    }

    /// SOS button press: start the countdown, or abort a running one.
    fn on_trigger(&mut self, countdown: &mut Option<Interval>, remaining: &mut u32) {
        match self.phase {
            SosPhase::Countdown(_) => {
                *countdown = None;
                *remaining = 0;
                self.phase = SosPhase::Idle;
                info!(user_id = %self.user_id, "countdown aborted");
                self.publish();
            }
            phase if phase.can_trigger() => {
                *remaining = self.config.countdown_ticks;
                if *remaining == 0 {
                    // Zero-length countdown fires on the next loop turn.
                    *remaining = 1;
                }
                let tick = self.config.countdown_tick();
                *countdown = Some(interval_at(Instant::now() + tick, tick));
                self.phase = SosPhase::Countdown(*remaining);
                self.responder = None;
                self.volunteers_notified = None;
                self.last_error = None;
                self.alert = None;
                info!(user_id = %self.user_id, ticks = *remaining, "countdown started");
                self.publish();
            }
            _ => {
                debug!(phase = ?self.phase, "trigger ignored");
            }
        }
    }

    /// Countdown finished: acquire a position and raise the alert.
    async fn submit(&mut self, poll: &mut Option<Interval>) {
        self.phase = SosPhase::Submitting;
        self.publish();

        let coords = match self
            .source
            .current_position(self.config.location_timeout())
            .await
        {
            Ok(coords) => coords,
            // Fall back to the last known fix before giving up.
            Err(_) => match self.source.subscribe().borrow().clone() {
                Some(sample) => sample.coords,
                None => {
                    warn!(user_id = %self.user_id, "no position available, alert not sent");
                    self.phase = SosPhase::Idle;
                    self.last_error = Some(AlertError::LocationUnavailable.to_string());
                    self.publish();
                    return;
                }
            },
        };

        let request = CreateAlertRequest {
            requester_id: self.user_id.clone(),
            requester_name: self.user_name.clone(),
            latitude: coords.latitude,
            longitude: coords.longitude,
            kind: self.kind,
            message: self.message.clone(),
        };

        match self.service.create(request).await {
            Ok(ack) => {
                info!(alert_id = %ack.alert_id, notified = ack.volunteers_notified, "alert raised");
                let streamer = self.config.live_location.then(|| {
                    LocationStreamer::start(
                        ack.alert_id.clone(),
                        Arc::clone(&self.service),
                        Arc::clone(&self.source),
                        self.config.push_interval(),
                    )
                });
                self.alert = Some(ActiveAlert {
                    id: ack.alert_id,
                    status: AlertStatus::Active,
                    streamer,
                });
                self.volunteers_notified = Some(ack.volunteers_notified);
                self.phase = SosPhase::Active;
                let interval = self.config.poll_interval();
                *poll = Some(interval_at(Instant::now() + interval, interval));
            }
            Err(e) => {
                warn!(error = %e, "alert submission failed");
                self.phase = SosPhase::Idle;
                self.last_error = Some(e.to_string());
            }
        }
        self.publish();
    }

    /// Poll backstop: fetch the record of truth and merge it in.
    async fn on_poll(&mut self, poll: &mut Option<Interval>) {
        let Some(alert_id) = self.alert.as_ref().map(|a| a.id.clone()) else {
            *poll = None;
            return;
        };

        match self.service.get(&alert_id).await {
            Ok(snapshot) => {
                let responder = snapshot.assignment.map(|a| summarize(&a));
                if self.apply_status(snapshot.status, responder) {
                    *poll = None;
                }
            }
            Err(e) if e.is_retryable() => {
                debug!(%alert_id, error = %e, "status poll failed, will retry");
            }
            Err(e) => {
                warn!(%alert_id, error = %e, "status poll rejected, stopping");
                *poll = None;
            }
        }
    }

    fn on_event(&mut self, event: RealtimeEvent) {
        if let RealtimeEvent::VolunteerResponding {
            alert_id,
            volunteer_name,
            estimated_time,
        } = event
        {
            // A stale event for a previous alert must not touch this one.
            if self.alert.as_ref().is_some_and(|a| a.id == alert_id) {
                self.apply_status(
                    AlertStatus::Responding,
                    Some(RespondingSummary {
                        volunteer_name,
                        eta_minutes: estimated_time,
                    }),
                );
            }
        }
    }

    /// Merge an incoming status through the lattice. Returns true when the
    /// alert reached a terminal state and the poll loop should stop.
    fn apply_status(
        &mut self,
        incoming: AlertStatus,
        responder: Option<RespondingSummary>,
    ) -> bool {
        let Some(alert) = self.alert.as_mut() else {
            return true;
        };

        let merged = alert.status.merge(incoming);
        if merged == alert.status {
            return merged.is_terminal();
        }
        alert.status = merged;

        match merged {
            AlertStatus::Responding => {
                info!(alert_id = %alert.id, "responder on the way");
                self.phase = SosPhase::Responding;
                self.responder = responder;
            }
            AlertStatus::Resolved => {
                self.phase = SosPhase::Resolved;
                self.stop_streaming();
            }
            AlertStatus::Cancelled => {
                self.phase = SosPhase::Cancelled;
                self.stop_streaming();
            }
            AlertStatus::Active => {}
        }
        self.publish();
        merged.is_terminal()
    }

    async fn on_cancel(
        &mut self,
        countdown: &mut Option<Interval>,
        poll: &mut Option<Interval>,
    ) -> Result<(), AlertError> {
        if matches!(self.phase, SosPhase::Countdown(_)) {
            *countdown = None;
            self.phase = SosPhase::Idle;
            self.publish();
            return Ok(());
        }

        let Some(alert_id) = self.alert.as_ref().map(|a| a.id.clone()) else {
            return Ok(());
        };
        match self.service.cancel(&alert_id).await {
            Ok(()) => {
                self.apply_status(AlertStatus::Cancelled, None);
                *poll = None;
                Ok(())
            }
            // State unchanged so the user can retry.
            Err(e) => Err(e),
        }
    }

    async fn on_resolve(
        &mut self,
        notes: Option<String>,
        poll: &mut Option<Interval>,
    ) -> Result<(), AlertError> {
        let Some(alert_id) = self.alert.as_ref().map(|a| a.id.clone()) else {
            return Ok(());
        };
        match self.service.resolve(&alert_id, notes).await {
            Ok(()) => {
                self.apply_status(AlertStatus::Resolved, None);
                *poll = None;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn stop_streaming(&mut self) {
        if let Some(alert) = &self.alert {
            if let Some(streamer) = &alert.streamer {
                streamer.stop();
            }
        }
    }

    fn publish(&self) {
        let _ = self.view_tx.send(LifecycleView {
            phase: self.phase,
            alert_id: self.alert.as_ref().map(|a| a.id.clone()),
            responder: self.responder.clone(),
            volunteers_notified: self.volunteers_notified,
            location_pushes: self
                .alert
                .as_ref()
                .and_then(|a| a.streamer.as_ref())
                .map(LocationStreamer::pushes_sent)
                .unwrap_or(0),
            last_error: self.last_error.clone(),
        });
    }
}

fn summarize(assignment: &ResponderAssignment) -> RespondingSummary {
    RespondingSummary {
        volunteer_name: assignment.volunteer_name.clone(),
        eta_minutes: assignment.eta_minutes,
    }
}

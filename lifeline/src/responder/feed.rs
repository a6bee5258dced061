//! Responder-side feed of open alerts.
//!
//! Push events keep the feed fresh; a reconcile poll against the service is
//! the backstop that also quietly removes alerts another responder won.
//! Declines are a local preference: the alert stays live for everyone else.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval};
use tracing::{debug, info, warn};

use super::config::ResponderConfig;
use crate::channel::{ChannelHandle, EventKind, RealtimeEvent, Room};
use crate::error::AlertError;
use crate::model::{AlertSummary, Coordinates};
use crate::service::{AlertService, ResponderRef};
use crate::toast::ToastHandle;
use crate::util::{recv_opt, tick_opt};

/// This responder's relationship to an alert in the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engagement {
    /// Visible, nobody assigned yet (as far as this feed knows).
    Open,
    /// This responder won the accept and is en route.
    Responding,
}

/// One feed entry.
#[derive(Debug, Clone)]
pub struct OpenAlert {
    pub summary: AlertSummary,
    pub engagement: Engagement,
    /// Latest live position of the requester, once streaming starts.
    pub live_position: Option<Coordinates>,
}

/// What an accept attempt came back with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted,
    /// Someone else got there first, or the alert closed. Not an error:
    /// the entry is gone and the responder moves on.
    Lost,
}

enum FeedCommand {
    GoOnDuty,
    GoOffDuty,
    Accept {
        alert_id: String,
        eta_minutes: Option<u32>,
        reply: oneshot::Sender<Result<AcceptOutcome, AlertError>>,
    },
    Decline {
        alert_id: String,
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Cloneable handle to a responder's feed task.
#[derive(Clone)]
pub struct FeedHandle {
    tx: mpsc::Sender<FeedCommand>,
    view_rx: watch::Receiver<Vec<OpenAlert>>,
}

impl FeedHandle {
    pub async fn go_on_duty(&self) -> Result<(), AlertError> {
        self.tx
            .send(FeedCommand::GoOnDuty)
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }

    pub async fn go_off_duty(&self) -> Result<(), AlertError> {
        self.tx
            .send(FeedCommand::GoOffDuty)
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }

    /// Try to take the alert. `Ok(Lost)` means it was already taken or
    /// closed; `Err` means the attempt itself failed and may be retried.
    pub async fn accept(
        &self,
        alert_id: &str,
        eta_minutes: Option<u32>,
    ) -> Result<AcceptOutcome, AlertError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(FeedCommand::Accept {
                alert_id: alert_id.to_string(),
                eta_minutes,
                reply,
            })
            .await
            .map_err(|_| AlertError::ChannelClosed)?;
        rx.await.map_err(|_| AlertError::ChannelClosed)?
    }

    /// Hide the alert from this feed permanently.
    pub async fn decline(&self, alert_id: &str) -> Result<(), AlertError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(FeedCommand::Decline {
                alert_id: alert_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| AlertError::ChannelClosed)?;
        rx.await.map_err(|_| AlertError::ChannelClosed)
    }

    pub fn alerts(&self) -> watch::Receiver<Vec<OpenAlert>> {
        self.view_rx.clone()
    }

    pub async fn shutdown(&self) -> Result<(), AlertError> {
        self.tx
            .send(FeedCommand::Shutdown)
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }
}

pub struct ResponderFeed {
    volunteer_id: String,
    name: String,
    position: Coordinates,
    config: ResponderConfig,
    service: Arc<dyn AlertService>,
    channel: ChannelHandle,
    toasts: Option<ToastHandle>,
    cmd_rx: mpsc::Receiver<FeedCommand>,
    view_tx: watch::Sender<Vec<OpenAlert>>,
    entries: Vec<OpenAlert>,
    declined: HashSet<String>,
    on_duty: bool,
}

impl ResponderFeed {
    pub fn spawn(
        volunteer_id: impl Into<String>,
        name: impl Into<String>,
        position: Coordinates,
        service: Arc<dyn AlertService>,
        channel: ChannelHandle,
        toasts: Option<ToastHandle>,
        config: ResponderConfig,
    ) -> (FeedHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (view_tx, view_rx) = watch::channel(Vec::new());

        let handle = FeedHandle {
            tx: cmd_tx,
            view_rx,
        };
        let feed = ResponderFeed {
            volunteer_id: volunteer_id.into(),
            name: name.into(),
            position,
            config,
            service,
            channel,
            toasts,
            cmd_rx,
            view_tx,
            entries: Vec::new(),
            declined: HashSet::new(),
            on_duty: false,
        };

        let task = tokio::spawn(feed.run());
        (handle, task)
    }

    async fn run(mut self) {
        let mut events = self
            .channel
            .subscribe(&[
                EventKind::NewAlert,
                EventKind::AlertCancelled,
                EventKind::AlertLocation,
            ])
            .await
            .ok();

        let mut poll: Option<Interval> = None;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(FeedCommand::Shutdown) => break,
                    Some(FeedCommand::GoOnDuty) => self.on_duty_change(true, &mut poll).await,
                    Some(FeedCommand::GoOffDuty) => self.on_duty_change(false, &mut poll).await,
                    Some(FeedCommand::Accept { alert_id, eta_minutes, reply }) => {
                        let result = self.on_accept(&alert_id, eta_minutes).await;
                        let _ = reply.send(result);
                    }
                    Some(FeedCommand::Decline { alert_id, reply }) => {
                        self.on_decline(&alert_id).await;
                        let _ = reply.send(());
                    }
                },
                _ = tick_opt(&mut poll) => {
                    self.reconcile().await;
                }
                event = recv_opt(&mut events) => match event {
                    Some(event) => self.on_event(event).await,
                    None => events = None,
                },
            }
        }

        debug!(volunteer_id = %self.volunteer_id, "responder feed stopped");
    }

    async fn on_duty_change(&mut self, on_duty: bool, poll: &mut Option<Interval>) {
        if self.on_duty == on_duty {
            return;
        }
        self.on_duty = on_duty;
        info!(volunteer_id = %self.volunteer_id, on_duty, "duty changed");

        let _ = self
            .channel
            .emit(RealtimeEvent::VolunteerStatus {
                volunteer_id: self.volunteer_id.clone(),
                on_duty,
            })
            .await;

        if on_duty {
            if let Err(e) = self.channel.join(Room::ResponderPool).await {
                warn!(error = %e, "could not join responder pool");
            }
            // Announce this responder's position to the pool.
            let _ = self
                .channel
                .emit(RealtimeEvent::VolunteerLocationUpdate {
                    volunteer_id: self.volunteer_id.clone(),
                    coords: self.position,
                })
                .await;
            // Catch up on anything raised before this session went on duty.
            self.reconcile().await;
            let interval = self.config.poll_interval();
            *poll = Some(interval_at(Instant::now() + interval, interval));
        } else {
            *poll = None;
            self.entries.retain(|e| e.engagement == Engagement::Responding);
            self.publish();
        }
    }

    /// Merge the service's view of open alerts into the feed.
    async fn reconcile(&mut self) {
        let fetched = match self
            .service
            .nearby_active(self.position, self.config.radius_km)
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                debug!(error = %e, "reconcile fetch failed, will retry");
                return;
            }
        };

        let fetched_ids: HashSet<String> =
            fetched.iter().map(|s| s.alert_id.clone()).collect();

        // Engaged entries never appear in the fetch, so ask for them
        // directly: a resolve, or a cancel whose push was missed, still has
        // to clear the feed eventually.
        let engaged: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.engagement == Engagement::Responding)
            .map(|e| e.summary.alert_id.clone())
            .collect();
        let mut closed: HashSet<String> = HashSet::new();
        for alert_id in engaged {
            match self.service.get(&alert_id).await {
                Ok(snapshot) => {
                    if snapshot.status.is_terminal() {
                        closed.insert(alert_id);
                    }
                }
                Err(AlertError::StaleState { .. }) => {
                    closed.insert(alert_id);
                }
                Err(e) => {
                    debug!(%alert_id, error = %e, "engaged status check failed, will retry");
                }
            }
        }

        // Entries this responder accepted stay until they close; merely-open
        // entries that vanished from the fetch were taken or closed.
        let before = self.entries.len();
        self.entries.retain(|e| {
            if closed.contains(&e.summary.alert_id) {
                return false;
            }
            e.engagement == Engagement::Responding || fetched_ids.contains(&e.summary.alert_id)
        });
        let mut changed = self.entries.len() != before;

        let known: HashSet<String> = self
            .entries
            .iter()
            .map(|e| e.summary.alert_id.clone())
            .collect();
        for summary in fetched {
            if known.contains(&summary.alert_id) || self.declined.contains(&summary.alert_id) {
                continue;
            }
            self.entries.push(OpenAlert {
                summary,
                engagement: Engagement::Open,
                live_position: None,
            });
            changed = true;
        }

        if changed {
            self.publish();
        }
    }

    async fn on_accept(
        &mut self,
        alert_id: &str,
        eta_minutes: Option<u32>,
    ) -> Result<AcceptOutcome, AlertError> {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.summary.alert_id == alert_id)
        else {
            return Ok(AcceptOutcome::Lost);
        };

        // Optimistic flip so the UI reacts immediately.
        entry.engagement = Engagement::Responding;
        self.publish();

        let responder = ResponderRef {
            volunteer_id: self.volunteer_id.clone(),
            name: self.name.clone(),
            eta_minutes,
        };
        match self.service.accept(alert_id, responder).await {
            Ok(()) => {
                info!(alert_id, volunteer_id = %self.volunteer_id, "accept won");
                // Follow the requester's live location from here on.
                let _ = self.channel.join(Room::Alert(alert_id.to_string())).await;
                Ok(AcceptOutcome::Accepted)
            }
            Err(AlertError::Conflict { .. }) | Err(AlertError::StaleState { .. }) => {
                info!(alert_id, "accept lost");
                self.entries.retain(|e| e.summary.alert_id != alert_id);
                self.publish();
                Ok(AcceptOutcome::Lost)
            }
            Err(e) => {
                // Attempt failed outright: roll back so it can be retried.
                if let Some(entry) = self
                    .entries
                    .iter_mut()
                    .find(|e| e.summary.alert_id == alert_id)
                {
                    entry.engagement = Engagement::Open;
                }
                self.publish();
                Err(e)
            }
        }
    }

    async fn on_decline(&mut self, alert_id: &str) {
        self.declined.insert(alert_id.to_string());
        self.entries.retain(|e| e.summary.alert_id != alert_id);
        self.publish();

        // Advisory only; the suppression above already took effect.
        if let Err(e) = self.service.decline(alert_id, &self.volunteer_id).await {
            debug!(alert_id, error = %e, "decline not recorded upstream");
        }
    }

    async fn on_event(&mut self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::NewAlert(summary) => {
                if !self.on_duty || self.declined.contains(&summary.alert_id) {
                    return;
                }
                if self
                    .entries
                    .iter()
                    .any(|e| e.summary.alert_id == summary.alert_id)
                {
                    return;
                }
                let mut summary = summary;
                let distance = self.position.distance_km(&summary.location);
                if distance > self.config.radius_km {
                    return;
                }
                summary.distance_km = Some(distance);

                if let Some(toasts) = &self.toasts {
                    let _ = toasts.push(summary.clone()).await;
                }
                self.entries.push(OpenAlert {
                    summary,
                    engagement: Engagement::Open,
                    live_position: None,
                });
                self.publish();
            }
            RealtimeEvent::AlertCancelled { alert_id } => {
                let before = self.entries.len();
                self.entries.retain(|e| e.summary.alert_id != alert_id);
                if self.entries.len() != before {
                    self.publish();
                }
            }
            RealtimeEvent::AlertLocation {
                alert_id,
                latitude,
                longitude,
                ..
            } => {
                if let Some(entry) = self
                    .entries
                    .iter_mut()
                    .find(|e| e.summary.alert_id == alert_id)
                {
                    entry.live_position = Some(Coordinates::new(latitude, longitude));
                    self.publish();
                }
            }
            _ => {}
        }
    }

    fn publish(&self) {
        let _ = self.view_tx.send(self.entries.clone());
    }
}

//! In-memory alert service backed by the local hub.
//!
//! Serializes every mutation behind one async mutex, which is what makes it
//! the arbiter: two racing `accept` calls are ordered by lock acquisition
//! and the second one observes the first one's assignment.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{AlertService, CreateAlertAck, CreateAlertRequest, ResponderRef};
use crate::channel::{LocalHub, RealtimeEvent, Room};
use crate::error::AlertError;
use crate::model::{
    Alert, AlertSnapshot, AlertStatus, AlertSummary, Coordinates, LocationHistory, LocationSample,
    ResponderAssignment, ResponderPresence, DEFAULT_HISTORY_CAPACITY,
};

struct ServiceInner {
    alerts: HashMap<String, Alert>,
    presences: HashMap<String, ResponderPresence>,
    contacts: HashMap<String, Vec<String>>,
    declines: HashSet<(String, String)>,
    fail_next: Option<AlertError>,
    history_capacity: usize,
}

/// Reference implementation of [`AlertService`].
pub struct InMemoryAlertService {
    inner: Mutex<ServiceInner>,
    hub: Option<LocalHub>,
}

impl InMemoryAlertService {
    pub fn new(hub: Option<LocalHub>) -> Self {
        Self {
            inner: Mutex::new(ServiceInner {
                alerts: HashMap::new(),
                presences: HashMap::new(),
                contacts: HashMap::new(),
                declines: HashSet::new(),
                fail_next: None,
                history_capacity: DEFAULT_HISTORY_CAPACITY,
            }),
            hub,
        }
    }

    pub fn with_history_capacity(hub: Option<LocalHub>, capacity: usize) -> Self {
        let service = Self::new(hub);
        if let Ok(mut inner) = service.inner.try_lock() {
            inner.history_capacity = capacity;
        }
        service
    }

    /// Register a volunteer so duty toggles and notification counts see them.
    pub async fn upsert_presence(&self, presence: ResponderPresence) {
        let mut inner = self.inner.lock().await;
        inner
            .presences
            .insert(presence.volunteer_id.clone(), presence);
    }

    /// Toggle a volunteer's duty flag, broadcasting the change to the pool.
    pub async fn set_duty(&self, volunteer_id: &str, on_duty: bool) -> Result<(), AlertError> {
        {
            let mut inner = self.inner.lock().await;
            let presence = inner
                .presences
                .get_mut(volunteer_id)
                .ok_or_else(|| AlertError::stale(volunteer_id))?;
            presence.on_duty = on_duty;
        }
        self.publish(
            &Room::ResponderPool,
            RealtimeEvent::VolunteerStatus {
                volunteer_id: volunteer_id.to_string(),
                on_duty,
            },
        )
        .await;
        Ok(())
    }

    /// Record a volunteer's last known position.
    pub async fn set_responder_position(
        &self,
        volunteer_id: &str,
        sample: LocationSample,
    ) -> Result<(), AlertError> {
        let mut inner = self.inner.lock().await;
        let presence = inner
            .presences
            .get_mut(volunteer_id)
            .ok_or_else(|| AlertError::stale(volunteer_id))?;
        presence.last_seen = Some(sample);
        Ok(())
    }

    /// Emergency contacts notified alongside responders when `user_id` raises
    /// an alert.
    pub async fn register_contacts(&self, user_id: &str, contacts: Vec<String>) {
        let mut inner = self.inner.lock().await;
        inner.contacts.insert(user_id.to_string(), contacts);
    }

    /// Make the next fallible operation return `error` instead. Test hook.
    pub async fn fail_next(&self, error: AlertError) {
        self.inner.lock().await.fail_next = Some(error);
    }

    pub async fn alert_count(&self) -> usize {
        self.inner.lock().await.alerts.len()
    }

    async fn publish(&self, room: &Room, event: RealtimeEvent) {
        if let Some(hub) = &self.hub {
            hub.broadcast(room, event).await;
        }
    }

    fn take_injected_failure(inner: &mut ServiceInner) -> Result<(), AlertError> {
        match inner.fail_next.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AlertService for InMemoryAlertService {
    async fn create(&self, req: CreateAlertRequest) -> Result<CreateAlertAck, AlertError> {
        let (alert, ack) = {
            let mut inner = self.inner.lock().await;
            Self::take_injected_failure(&mut inner)?;

            let alert = Alert {
                id: Uuid::now_v7().to_string(),
                requester_id: req.requester_id.clone(),
                requester_name: req.requester_name,
                coords: Coordinates::new(req.latitude, req.longitude),
                address: None,
                kind: req.kind,
                message: req.message,
                status: AlertStatus::Active,
                created_at: Utc::now(),
                assignment: None,
                history: LocationHistory::new(inner.history_capacity),
                resolution_notes: None,
                closed_at: None,
            };

            let ack = CreateAlertAck {
                alert_id: alert.id.clone(),
                volunteers_notified: inner.presences.values().filter(|p| p.on_duty).count(),
                contacts_notified: inner
                    .contacts
                    .get(&req.requester_id)
                    .map(Vec::len)
                    .unwrap_or(0),
            };
            inner.alerts.insert(alert.id.clone(), alert.clone());
            (alert, ack)
        };

        info!(alert_id = %ack.alert_id, kind = ?alert.kind, "alert created");
        self.publish(&Room::ResponderPool, RealtimeEvent::NewAlert(alert.summary(None)))
            .await;
        Ok(ack)
    }

    async fn get(&self, alert_id: &str) -> Result<AlertSnapshot, AlertError> {
        let mut inner = self.inner.lock().await;
        Self::take_injected_failure(&mut inner)?;
        inner
            .alerts
            .get(alert_id)
            .map(Alert::snapshot)
            .ok_or_else(|| AlertError::stale(alert_id))
    }

    async fn cancel(&self, alert_id: &str) -> Result<(), AlertError> {
        {
            let mut inner = self.inner.lock().await;
            Self::take_injected_failure(&mut inner)?;
            let alert = inner
                .alerts
                .get_mut(alert_id)
                .ok_or_else(|| AlertError::stale(alert_id))?;

            match alert.status {
                AlertStatus::Cancelled => return Ok(()),
                AlertStatus::Resolved => return Err(AlertError::stale(alert_id)),
                AlertStatus::Active | AlertStatus::Responding => {
                    alert.status = AlertStatus::Cancelled;
                    alert.closed_at = Some(Utc::now());
                }
            }
        }

        info!(alert_id, "alert cancelled");
        self.publish(
            &Room::ResponderPool,
            RealtimeEvent::AlertCancelled {
                alert_id: alert_id.to_string(),
            },
        )
        .await;
        Ok(())
    }

    async fn resolve(&self, alert_id: &str, notes: Option<String>) -> Result<(), AlertError> {
        let mut inner = self.inner.lock().await;
        Self::take_injected_failure(&mut inner)?;
        let alert = inner
            .alerts
            .get_mut(alert_id)
            .ok_or_else(|| AlertError::stale(alert_id))?;

        match alert.status {
            AlertStatus::Resolved => Ok(()),
            AlertStatus::Cancelled => Err(AlertError::stale(alert_id)),
            AlertStatus::Active | AlertStatus::Responding => {
                alert.status = AlertStatus::Resolved;
                alert.closed_at = Some(Utc::now());
                alert.resolution_notes = notes;
                info!(alert_id, "alert resolved");
                Ok(())
            }
        }
    }

    async fn update_location(
        &self,
        alert_id: &str,
        sample: LocationSample,
    ) -> Result<(), AlertError> {
        {
            let mut inner = self.inner.lock().await;
            Self::take_injected_failure(&mut inner)?;
            let alert = inner
                .alerts
                .get_mut(alert_id)
                .ok_or_else(|| AlertError::stale(alert_id))?;

            if alert.status.is_terminal() {
                return Err(AlertError::stale(alert_id));
            }
            alert.coords = sample.coords;
            alert.history.push(sample.clone());
        }

        self.publish(
            &Room::Alert(alert_id.to_string()),
            RealtimeEvent::AlertLocation {
                alert_id: alert_id.to_string(),
                latitude: sample.coords.latitude,
                longitude: sample.coords.longitude,
                timestamp: sample.timestamp,
            },
        )
        .await;
        Ok(())
    }

    async fn accept(&self, alert_id: &str, responder: ResponderRef) -> Result<(), AlertError> {
        let requester_id = {
            let mut inner = self.inner.lock().await;
            Self::take_injected_failure(&mut inner)?;
            let alert = inner
                .alerts
                .get_mut(alert_id)
                .ok_or_else(|| AlertError::stale(alert_id))?;

            match alert.status {
                AlertStatus::Active => {
                    alert.status = AlertStatus::Responding;
                    alert.assignment = Some(ResponderAssignment {
                        volunteer_id: responder.volunteer_id.clone(),
                        volunteer_name: responder.name.clone(),
                        eta_minutes: responder.eta_minutes,
                    });
                    alert.requester_id.clone()
                }
                AlertStatus::Responding => {
                    debug!(alert_id, volunteer = %responder.volunteer_id, "accept lost race");
                    return Err(AlertError::Conflict {
                        alert_id: alert_id.to_string(),
                    });
                }
                AlertStatus::Resolved | AlertStatus::Cancelled => {
                    return Err(AlertError::stale(alert_id));
                }
            }
        };

        info!(alert_id, volunteer = %responder.volunteer_id, "responder assigned");
        self.publish(
            &Room::Personal(requester_id),
            RealtimeEvent::VolunteerResponding {
                alert_id: alert_id.to_string(),
                volunteer_name: responder.name,
                estimated_time: responder.eta_minutes,
            },
        )
        .await;
        Ok(())
    }

    async fn decline(&self, alert_id: &str, volunteer_id: &str) -> Result<(), AlertError> {
        let mut inner = self.inner.lock().await;
        Self::take_injected_failure(&mut inner)?;
        inner
            .declines
            .insert((alert_id.to_string(), volunteer_id.to_string()));
        debug!(alert_id, volunteer_id, "decline recorded");
        Ok(())
    }

    async fn nearby_active(
        &self,
        origin: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<AlertSummary>, AlertError> {
        let mut inner = self.inner.lock().await;
        Self::take_injected_failure(&mut inner)?;

        let mut found: Vec<AlertSummary> = inner
            .alerts
            .values()
            .filter(|a| a.status == AlertStatus::Active)
            .map(|a| a.summary(Some(origin)))
            .filter(|s| s.distance_km.is_some_and(|d| d <= radius_km))
            .collect();
        found.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlertKind;

    fn request(user: &str) -> CreateAlertRequest {
        CreateAlertRequest {
            requester_id: user.to_string(),
            requester_name: user.to_string(),
            latitude: 12.9716,
            longitude: 77.5946,
            kind: AlertKind::Sos,
            message: "need help".to_string(),
        }
    }

    fn responder(id: &str) -> ResponderRef {
        ResponderRef {
            volunteer_id: id.to_string(),
            name: id.to_string(),
            eta_minutes: Some(5),
        }
    }

    #[tokio::test]
    async fn test_create_counts_on_duty_volunteers_and_contacts() {
        let service = InMemoryAlertService::new(None);
        service
            .upsert_presence(ResponderPresence::new("v-1", "Ravi"))
            .await;
        service
            .upsert_presence(ResponderPresence::new("v-2", "Meera"))
            .await;
        service.set_duty("v-1", true).await.unwrap();
        service
            .register_contacts("u-1", vec!["mom".to_string(), "dad".to_string()])
            .await;

        let ack = service.create(request("u-1")).await.unwrap();
        assert_eq!(ack.volunteers_notified, 1);
        assert_eq!(ack.contacts_notified, 2);
        assert_eq!(service.alert_count().await, 1);
    }

    #[tokio::test]
    async fn test_responder_position_updates_presence() {
        let service = InMemoryAlertService::new(None);
        service
            .upsert_presence(ResponderPresence::new("v-1", "Ravi"))
            .await;

        let sample = LocationSample::now(Coordinates::new(12.9352, 77.6245));
        service.set_responder_position("v-1", sample.clone()).await.unwrap();

        assert!(
            service
                .set_responder_position("v-9", sample)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_accept_race_single_winner() {
        let service = InMemoryAlertService::new(None);
        let ack = service.create(request("u-1")).await.unwrap();

        service.accept(&ack.alert_id, responder("v-1")).await.unwrap();
        let second = service.accept(&ack.alert_id, responder("v-2")).await;
        assert!(matches!(second, Err(AlertError::Conflict { .. })));

        let snapshot = service.get(&ack.alert_id).await.unwrap();
        assert_eq!(snapshot.status, AlertStatus::Responding);
        assert_eq!(snapshot.assignment.unwrap().volunteer_id, "v-1");
    }

    #[tokio::test]
    async fn test_accept_after_close_is_stale() {
        let service = InMemoryAlertService::new(None);
        let ack = service.create(request("u-1")).await.unwrap();
        service.cancel(&ack.alert_id).await.unwrap();

        let result = service.accept(&ack.alert_id, responder("v-1")).await;
        assert!(matches!(result, Err(AlertError::StaleState { .. })));
    }

    #[tokio::test]
    async fn test_cancel_and_resolve_idempotent_on_same_terminal() {
        let service = InMemoryAlertService::new(None);
        let ack = service.create(request("u-1")).await.unwrap();

        service.cancel(&ack.alert_id).await.unwrap();
        service.cancel(&ack.alert_id).await.unwrap();
        assert!(service.resolve(&ack.alert_id, None).await.is_err());

        let ack2 = service.create(request("u-2")).await.unwrap();
        service.resolve(&ack2.alert_id, None).await.unwrap();
        service.resolve(&ack2.alert_id, None).await.unwrap();
        assert!(service.cancel(&ack2.alert_id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_location_appends_and_rejects_closed() {
        let service = InMemoryAlertService::new(None);
        let ack = service.create(request("u-1")).await.unwrap();

        let sample = LocationSample::now(Coordinates::new(12.98, 77.60));
        service.update_location(&ack.alert_id, sample).await.unwrap();
        let snapshot = service.get(&ack.alert_id).await.unwrap();
        assert_eq!(snapshot.history.len(), 1);

        service.cancel(&ack.alert_id).await.unwrap();
        let late = LocationSample::now(Coordinates::new(12.99, 77.61));
        let result = service.update_location(&ack.alert_id, late).await;
        assert!(matches!(result, Err(AlertError::StaleState { .. })));
    }

    #[tokio::test]
    async fn test_nearby_active_filters_status_and_radius() {
        let service = InMemoryAlertService::new(None);
        let near = service.create(request("u-1")).await.unwrap();
        let taken = service.create(request("u-2")).await.unwrap();
        service.accept(&taken.alert_id, responder("v-1")).await.unwrap();

        let mut far_req = request("u-3");
        far_req.latitude = 28.6139; // Delhi, far outside the radius
        far_req.longitude = 77.2090;
        service.create(far_req).await.unwrap();

        let origin = Coordinates::new(12.9716, 77.5946);
        let found = service.nearby_active(origin, 10.0).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].alert_id, near.alert_id);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let service = InMemoryAlertService::new(None);
        service.fail_next(AlertError::network("injected")).await;

        assert!(service.create(request("u-1")).await.is_err());
        assert!(service.create(request("u-1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_response_time_reported_after_resolve() {
        let service = InMemoryAlertService::new(None);
        let ack = service.create(request("u-1")).await.unwrap();
        service.accept(&ack.alert_id, responder("v-1")).await.unwrap();
        service
            .resolve(&ack.alert_id, Some("safe".to_string()))
            .await
            .unwrap();

        let snapshot = service.get(&ack.alert_id).await.unwrap();
        assert_eq!(snapshot.status, AlertStatus::Resolved);
        assert!(snapshot.response_time_secs.is_some());
    }
}

//! Core data model: alerts, the status lattice, and geolocation samples.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default cap for an alert's location history ring buffer.
///
/// At one push every ten seconds this covers well over an hour of live
/// tracking; older samples are evicted rather than growing without bound.
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Lifecycle status of an alert.
///
/// The total order is `active < responding < {resolved, cancelled}`; consumers
/// apply transitions through [`AlertStatus::merge`] so late or duplicate poll
/// results can never move an alert backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Responding,
    Resolved,
    Cancelled,
}

impl AlertStatus {
    fn rank(self) -> u8 {
        match self {
            AlertStatus::Active => 0,
            AlertStatus::Responding => 1,
            AlertStatus::Resolved | AlertStatus::Cancelled => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    /// Merge an incoming status report into the current one.
    ///
    /// Returns the incoming status only when it advances the lifecycle;
    /// duplicates are idempotent, regressions are ignored, and the first
    /// terminal status observed wins over a conflicting one.
    pub fn merge(self, incoming: AlertStatus) -> AlertStatus {
        if incoming.rank() > self.rank() {
            incoming
        } else {
            self
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertStatus::Active => "active",
            AlertStatus::Responding => "responding",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Category of emergency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Sos,
    Medical,
    Harassment,
    Accident,
}

impl AlertKind {
    /// Notification priority shown to responders.
    pub fn priority(self) -> Priority {
        match self {
            AlertKind::Sos | AlertKind::Medical => Priority::High,
            AlertKind::Harassment | AlertKind::Accident => Priority::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// A WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;

        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// A timestamped position sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub coords: Coordinates,
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    pub fn now(coords: Coordinates) -> Self {
        Self {
            coords,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only location trail with bounded retention.
///
/// Appending past capacity evicts the oldest sample (ring buffer), which is
/// the explicit retention policy for very long-running alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationHistory {
    samples: VecDeque<LocationSample>,
    capacity: usize,
}

impl LocationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, sample: LocationSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&LocationSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocationSample> {
        self.samples.iter()
    }
}

impl Default for LocationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// The responder assigned to an alert; at most one at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponderAssignment {
    pub volunteer_id: String,
    pub volunteer_name: String,
    pub eta_minutes: Option<u32>,
}

/// The record of truth for a single emergency, owned by the alert service.
#[derive(Debug, Clone)]
pub struct Alert {
    pub id: String,
    pub requester_id: String,
    pub requester_name: String,
    pub coords: Coordinates,
    pub address: Option<String>,
    pub kind: AlertKind,
    pub message: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub assignment: Option<ResponderAssignment>,
    pub history: LocationHistory,
    pub resolution_notes: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Time from creation to resolution, available once resolved.
    pub fn response_time(&self) -> Option<chrono::Duration> {
        match self.status {
            AlertStatus::Resolved => self.closed_at.map(|t| t - self.created_at),
            _ => None,
        }
    }

    /// Point-in-time view returned by the service `get` operation.
    pub fn snapshot(&self) -> AlertSnapshot {
        AlertSnapshot {
            alert_id: self.id.clone(),
            status: self.status,
            assignment: self.assignment.clone(),
            response_time_secs: self.response_time().map(|d| d.num_seconds()),
            history: self.history.iter().cloned().collect(),
        }
    }

    /// Announcement payload pushed to the responder pool.
    pub fn summary(&self, origin: Option<Coordinates>) -> AlertSummary {
        AlertSummary {
            alert_id: self.id.clone(),
            user_name: self.requester_name.clone(),
            kind: self.kind,
            priority: self.kind.priority(),
            message: self.message.clone(),
            location: self.coords,
            address: self.address.clone(),
            distance_km: origin.map(|o| o.distance_km(&self.coords)),
        }
    }
}

/// Result of the service `get` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSnapshot {
    pub alert_id: String,
    pub status: AlertStatus,
    pub assignment: Option<ResponderAssignment>,
    pub response_time_secs: Option<i64>,
    pub history: Vec<LocationSample>,
}

/// The `new_alert` payload seen by responders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub alert_id: String,
    pub user_name: String,
    pub kind: AlertKind,
    pub priority: Priority,
    pub message: String,
    pub location: Coordinates,
    pub address: Option<String>,
    pub distance_km: Option<f64>,
}

/// A volunteer's standing record: created at registration, mutated by duty
/// toggles and position updates, never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderPresence {
    pub volunteer_id: String,
    pub name: String,
    pub on_duty: bool,
    pub last_seen: Option<LocationSample>,
    pub capabilities: Vec<String>,
    pub rating: f32,
    pub responses: u32,
}

impl ResponderPresence {
    pub fn new(volunteer_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            volunteer_id: volunteer_id.into(),
            name: name.into(),
            on_duty: false,
            last_seen: None,
            capabilities: Vec::new(),
            rating: 0.0,
            responses: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_merge_advances() {
        assert_eq!(
            AlertStatus::Active.merge(AlertStatus::Responding),
            AlertStatus::Responding
        );
        assert_eq!(
            AlertStatus::Responding.merge(AlertStatus::Resolved),
            AlertStatus::Resolved
        );
        assert_eq!(
            AlertStatus::Active.merge(AlertStatus::Cancelled),
            AlertStatus::Cancelled
        );
    }

    #[test]
    fn test_status_merge_never_regresses() {
        // A delayed poll reporting "active" after the local state advanced
        // must not move the status backwards.
        assert_eq!(
            AlertStatus::Responding.merge(AlertStatus::Active),
            AlertStatus::Responding
        );
        assert_eq!(
            AlertStatus::Resolved.merge(AlertStatus::Active),
            AlertStatus::Resolved
        );
        assert_eq!(
            AlertStatus::Resolved.merge(AlertStatus::Responding),
            AlertStatus::Resolved
        );
    }

    #[test]
    fn test_status_merge_idempotent() {
        for status in [
            AlertStatus::Active,
            AlertStatus::Responding,
            AlertStatus::Resolved,
            AlertStatus::Cancelled,
        ] {
            assert_eq!(status.merge(status), status);
        }
    }

    #[test]
    fn test_status_merge_first_terminal_wins() {
        assert_eq!(
            AlertStatus::Resolved.merge(AlertStatus::Cancelled),
            AlertStatus::Resolved
        );
        assert_eq!(
            AlertStatus::Cancelled.merge(AlertStatus::Resolved),
            AlertStatus::Cancelled
        );
    }

    #[test]
    fn test_history_ring_buffer_evicts_oldest() {
        let mut history = LocationHistory::new(3);
        for i in 0..5 {
            history.push(LocationSample::now(Coordinates::new(i as f64, 0.0)));
        }
        assert_eq!(history.len(), 3);
        let oldest = history.iter().next().unwrap();
        assert_eq!(oldest.coords.latitude, 2.0);
        assert_eq!(history.latest().unwrap().coords.latitude, 4.0);
    }

    #[test]
    fn test_haversine_distance() {
        // MG Road to Koramangala, Bengaluru: roughly 5.5km.
        let a = Coordinates::new(12.9716, 77.5946);
        let b = Coordinates::new(12.9352, 77.6245);
        let d = a.distance_km(&b);
        assert!(d > 4.0 && d < 7.0, "unexpected distance {d}");
        assert!(a.distance_km(&a) < 1e-9);
    }

    #[test]
    fn test_kind_priority() {
        assert_eq!(AlertKind::Sos.priority(), Priority::High);
        assert_eq!(AlertKind::Harassment.priority(), Priority::Medium);
    }

    #[test]
    fn test_summary_serialization() {
        let summary = AlertSummary {
            alert_id: "a-1".to_string(),
            user_name: "Asha".to_string(),
            kind: AlertKind::Sos,
            priority: Priority::High,
            message: "need help".to_string(),
            location: Coordinates::new(12.9716, 77.5946),
            address: None,
            distance_km: Some(0.5),
        };

        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"kind\":\"sos\""));
        assert!(json.contains("\"priority\":\"high\""));

        let back: AlertSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn test_response_time_only_when_resolved() {
        let mut alert = Alert {
            id: "a-1".to_string(),
            requester_id: "u-1".to_string(),
            requester_name: "Asha".to_string(),
            coords: Coordinates::new(0.0, 0.0),
            address: None,
            kind: AlertKind::Sos,
            message: String::new(),
            status: AlertStatus::Active,
            created_at: Utc::now(),
            assignment: None,
            history: LocationHistory::default(),
            resolution_notes: None,
            closed_at: None,
        };
        assert!(alert.response_time().is_none());

        alert.status = AlertStatus::Resolved;
        alert.closed_at = Some(alert.created_at + chrono::Duration::seconds(240));
        assert_eq!(alert.response_time().unwrap().num_seconds(), 240);
    }
}

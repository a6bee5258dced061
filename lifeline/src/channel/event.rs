//! Typed realtime events and room addressing.
//!
//! The wire format is a tagged union (`event` discriminator) so a renamed or
//! reshaped event is a build error in every consumer, not a silently dead
//! string-keyed handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AlertSummary, Coordinates};

/// Events carried over the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// A new alert was raised; broadcast to the responder pool.
    NewAlert(AlertSummary),

    /// The requester cancelled; broadcast to the responder pool.
    AlertCancelled { alert_id: String },

    /// A responder accepted; delivered to the requester's personal room.
    VolunteerResponding {
        alert_id: String,
        volunteer_name: String,
        estimated_time: Option<u32>,
    },

    /// Duty toggle broadcast.
    VolunteerStatus { volunteer_id: String, on_duty: bool },

    /// Responder position broadcast.
    VolunteerLocationUpdate {
        volunteer_id: String,
        coords: Coordinates,
    },

    /// Live requester position on the per-alert location room.
    AlertLocation {
        alert_id: String,
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
    },
}

/// Field-less discriminant used for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewAlert,
    AlertCancelled,
    VolunteerResponding,
    VolunteerStatus,
    VolunteerLocationUpdate,
    AlertLocation,
}

impl RealtimeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RealtimeEvent::NewAlert(_) => EventKind::NewAlert,
            RealtimeEvent::AlertCancelled { .. } => EventKind::AlertCancelled,
            RealtimeEvent::VolunteerResponding { .. } => EventKind::VolunteerResponding,
            RealtimeEvent::VolunteerStatus { .. } => EventKind::VolunteerStatus,
            RealtimeEvent::VolunteerLocationUpdate { .. } => EventKind::VolunteerLocationUpdate,
            RealtimeEvent::AlertLocation { .. } => EventKind::AlertLocation,
        }
    }

    /// Routing target for client-emitted events. `VolunteerResponding` has no
    /// default room: only the service addresses a requester directly.
    pub fn default_room(&self) -> Option<Room> {
        match self {
            RealtimeEvent::NewAlert(_)
            | RealtimeEvent::AlertCancelled { .. }
            | RealtimeEvent::VolunteerStatus { .. }
            | RealtimeEvent::VolunteerLocationUpdate { .. } => Some(Room::ResponderPool),
            RealtimeEvent::AlertLocation { alert_id, .. } => Some(Room::Alert(alert_id.clone())),
            RealtimeEvent::VolunteerResponding { .. } => None,
        }
    }
}

/// Logical delivery rooms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// One per authenticated user; carries events addressed to them alone.
    Personal(String),
    /// Shared by every on-duty responder.
    ResponderPool,
    /// Per-alert live location feed, keyed by alert id.
    Alert(String),
}

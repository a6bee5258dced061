//! Alert service seam: the backend that owns the record of truth.
//!
//! Everything above this trait (lifecycle controller, responder feed,
//! location streamer) is backend-agnostic; the in-memory implementation is
//! the reference arbiter for the accept race and the status lattice.

mod memory;

pub use memory::InMemoryAlertService;

use async_trait::async_trait;

use crate::error::AlertError;
use crate::model::{AlertKind, AlertSnapshot, AlertSummary, Coordinates, LocationSample};

/// Payload for raising a new alert.
#[derive(Debug, Clone)]
pub struct CreateAlertRequest {
    pub requester_id: String,
    pub requester_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub kind: AlertKind,
    pub message: String,
}

/// Acknowledgement for a raised alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAlertAck {
    pub alert_id: String,
    pub volunteers_notified: usize,
    pub contacts_notified: usize,
}

/// Identity of a responder attempting to accept an alert.
#[derive(Debug, Clone)]
pub struct ResponderRef {
    pub volunteer_id: String,
    pub name: String,
    pub eta_minutes: Option<u32>,
}

/// Operations on the alert record of truth.
///
/// `accept` is the arbiter for the many-responders race: exactly one call
/// per alert succeeds, every later one gets [`AlertError::Conflict`] while
/// the alert is still open and [`AlertError::StaleState`] once it is not.
#[async_trait]
pub trait AlertService: Send + Sync {
    async fn create(&self, req: CreateAlertRequest) -> Result<CreateAlertAck, AlertError>;

    async fn get(&self, alert_id: &str) -> Result<AlertSnapshot, AlertError>;

    /// Requester cancels. Idempotent when already cancelled.
    async fn cancel(&self, alert_id: &str) -> Result<(), AlertError>;

    /// Close the alert as handled. Idempotent when already resolved.
    async fn resolve(&self, alert_id: &str, notes: Option<String>) -> Result<(), AlertError>;

    /// Append a live position sample to an open alert's trail.
    async fn update_location(
        &self,
        alert_id: &str,
        sample: LocationSample,
    ) -> Result<(), AlertError>;

    async fn accept(&self, alert_id: &str, responder: ResponderRef) -> Result<(), AlertError>;

    /// Advisory: this volunteer does not want to see this alert again.
    async fn decline(&self, alert_id: &str, volunteer_id: &str) -> Result<(), AlertError>;

    /// Alerts still awaiting a responder, ordered nearest first.
    async fn nearby_active(
        &self,
        origin: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<AlertSummary>, AlertError>;
}

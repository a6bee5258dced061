//! Emergency alert coordination.
//!
//! `lifeline` keeps a requester in distress and nearby responders looking at
//! the same story: an alert moves through a small status lattice
//! (`active < responding < resolved/cancelled`), push events deliver changes
//! fast, and a periodic poll against the record of truth backstops anything
//! the push channel dropped.
//!
//! The main pieces:
//!
//! - [`lifecycle`]: the requester's SOS arc, from countdown to teardown
//! - [`responder`]: the on-duty feed, the accept race, decline suppression
//! - [`channel`]: the reconnecting push client and room routing
//! - [`streaming`]: live location pushes while an alert is open
//! - [`service`]: the backend seam and its in-memory reference arbiter
//! - [`toast`]: transient notifications with automatic expiry

pub mod channel;
pub mod error;
pub mod geo;
pub mod lifecycle;
pub mod model;
pub mod responder;
pub mod service;
pub mod session;
pub mod streaming;
pub mod toast;

mod util;

pub use error::AlertError;
pub use model::{Alert, AlertKind, AlertSnapshot, AlertStatus, AlertSummary, Coordinates};

//! Requester-side SOS lifecycle: countdown, submission, dual sync.

mod config;
mod controller;

pub use config::LifecycleConfig;
pub use controller::{LifecycleView, RespondingSummary, SosController, SosHandle, SosPhase};

//! Responder-side feed: duty, accept race, decline suppression.

mod config;
mod feed;

pub use config::ResponderConfig;
pub use feed::{AcceptOutcome, Engagement, FeedHandle, OpenAlert, ResponderFeed};

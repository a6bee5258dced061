//! Realtime push channel: typed events, room routing, and a reconnecting
//! client that owns the handler registry and room membership.

mod client;
mod config;
mod event;
mod local;
mod transport;

pub use client::{ChannelClient, ChannelHandle, ConnectionStatus};
pub use config::ChannelConfig;
pub use event::{EventKind, RealtimeEvent, Room};
pub use local::LocalHub;
pub use transport::{Connection, Transport, WireCommand};

//! Device-side connection manager for presence sessions.
//!
//! A [`PresenceClient`] declares presence at an address on the signaling
//! relay and hands back a [`SessionHandle`]. The session task keeps the link
//! alive (heartbeat, bounded exponential reconnect), routes negotiation blobs
//! to a [`MediaEngine`], and runs the obstruction grace period.

pub mod address;
pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod obstruction;
mod session;
pub mod transport;

pub use client::{NegotiationKind, PresenceClient, Reservation, SessionHandle};
pub use config::ClientConfig;
pub use error::ClientError;
pub use events::{EngineState, LifecycleSignal, Readiness, SessionEvent};
pub use media::{MediaEngine, NullMedia};
pub use obstruction::ObstructionCause;
pub use transport::{Connector, Link, WsConnector};

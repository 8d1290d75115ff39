//! Rendezvous relay for two-party presence sessions.
//!
//! Connections arrive over WebSocket tagged with an address, are paired into
//! rooms of at most two, receive their negotiation role, and then exchange
//! opaque signaling envelopes through the relay. A side registry keeps
//! advisory address reservations.

pub mod config;
pub mod connection;
pub mod error;
pub mod maintenance;
pub mod server;
pub mod state;

pub use config::{PeerLossPolicy, RelayConfig};
pub use error::RelayError;
pub use server::{start, RelayHandle};
pub use state::AppState;

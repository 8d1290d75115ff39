pub mod backends;
pub mod registry;
pub mod signaling;

pub use backends::BackendState;
pub use registry::{RegistryEntry, RegistryState};
pub use signaling::{ConnId, ConnSender, Outbound, ProbeReport, SignalingState};

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::config::RelayConfig;

/// Main application state wrapping all subsystems.
/// Each subsystem has its own Mutex so registry traffic never waits on room mutation.
pub struct AppState {
    pub signaling: Arc<Mutex<SignalingState>>,
    pub registry: Arc<Mutex<RegistryState>>,
    pub backends: Arc<Mutex<BackendState>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            signaling: Arc::new(Mutex::new(SignalingState::new(
                config.peer_loss,
                config.grace_seconds,
            ))),
            registry: Arc::new(Mutex::new(RegistryState::new())),
            backends: Arc::new(Mutex::new(BackendState::new())),
            started_at: Instant::now(),
        }
    }
}

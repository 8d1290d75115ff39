//! What a session reports back to the application.

use crate::obstruction::ObstructionCause;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    #[default]
    Idle,
    /// Connected, waiting for the relay to pair us
    Waiting,
    /// Paired and negotiating/streaming with the peer
    Alive,
    /// Transport lost, backing off before the next attempt
    Reconnecting,
}

/// Snapshot published on the session's watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineState {
    pub readiness: Readiness,
    /// Set once the session has collapsed
    pub collapse_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(EngineState),
    RemoteNickname(String),
    RemoteText(String),
    RemoteHold(bool),
    RemoteClear,
    RevealFrame {
        data: Vec<u8>,
        width: u32,
        height: u32,
    },
    RemoteVoiceMask(String),
    ObstructionStarted {
        cause: ObstructionCause,
        seconds: u64,
    },
    ObstructionCleared,
    Collapsed {
        reason: String,
    },
}

/// Platform lifecycle and attention signals fed into a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    FocusLost,
    Resumed,
    AttentionLost,
    AttentionRestored,
    AttentionExempted,
    AttentionExemptionCleared,
}

//! Grace-period bookkeeping for transient loss of focus or attention.
//!
//! This is plain data: the session task polls [`Obstruction::deadline`] in its
//! select loop and collapses the session when it fires. Nothing here sends
//! frames or emits events, the caller does that based on the return values.

use std::time::Duration;

use tokio::time::Instant;

/// Longest window we will hold open, whatever the peer asks for.
pub const MAX_WINDOW_SECS: u64 = 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObstructionCause {
    FocusLost,
    AttentionLost,
    /// Mirrored from a `peer_obstructed` notice
    PeerReported,
}

impl ObstructionCause {
    /// Wire reason sent along with `peer_obstructed`.
    pub fn as_reason(self) -> &'static str {
        match self {
            ObstructionCause::FocusLost => "app_lost_focus",
            ObstructionCause::AttentionLost => "attention_lost",
            ObstructionCause::PeerReported => "peer_obstructed",
        }
    }

    pub fn is_local(self) -> bool {
        self != ObstructionCause::PeerReported
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObstructionWindow {
    pub cause: ObstructionCause,
    pub seconds: u64,
    pub deadline: Instant,
}

#[derive(Debug, Default)]
pub struct Obstruction {
    window: Option<ObstructionWindow>,
    exempt: bool,
}

impl Obstruction {
    /// Open a window unless one is open already, the device is exempt, or the
    /// session is shutting down. Returns the window only when it was opened now.
    /// `seconds` is capped at [`MAX_WINDOW_SECS`].
    pub fn enter(
        &mut self,
        cause: ObstructionCause,
        seconds: u64,
        now: Instant,
        shutdown: bool,
    ) -> Option<&ObstructionWindow> {
        if shutdown || self.exempt || self.window.is_some() {
            return None;
        }
        let seconds = seconds.min(MAX_WINDOW_SECS);
        let deadline = now
            .checked_add(Duration::from_secs(seconds))
            .unwrap_or(now);
        self.window = Some(ObstructionWindow {
            cause,
            seconds,
            deadline,
        });
        self.window.as_ref()
    }

    /// Close the open window if `pred` accepts its cause.
    pub fn exit_if(&mut self, pred: impl Fn(ObstructionCause) -> bool) -> Option<ObstructionWindow> {
        match &self.window {
            Some(window) if pred(window.cause) => self.window.take(),
            _ => None,
        }
    }

    /// Close whatever window is open.
    pub fn exit(&mut self) -> Option<ObstructionWindow> {
        self.window.take()
    }

    /// Toggle the standing exemption. Becoming exempt force-clears an open
    /// window, which is returned.
    pub fn set_exempt(&mut self, exempt: bool) -> Option<ObstructionWindow> {
        self.exempt = exempt;
        if exempt {
            self.window.take()
        } else {
            None
        }
    }

    pub fn is_exempt(&self) -> bool {
        self.exempt
    }

    pub fn window(&self) -> Option<&ObstructionWindow> {
        self.window.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.window.as_ref().map(|w| w.deadline)
    }
}

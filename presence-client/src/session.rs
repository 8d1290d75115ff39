//! The per-session task.
//!
//! One task owns the relay link, the heartbeat, the reconnect backoff and the
//! obstruction deadline. Everything is polled from a single `select!`, so when
//! the task ends every timer ends with it.

use std::future::Future;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, info, warn};
use presence_protocol::{
    Envelope, Role, Signal, REASON_GRACE_EXPIRED, REASON_REMOTE_END, REASON_USER_TERMINATED,
};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::backoff::reconnect_delay;
use crate::config::ClientConfig;
use crate::events::{EngineState, LifecycleSignal, Readiness, SessionEvent};
use crate::media::MediaEngine;
use crate::obstruction::{Obstruction, ObstructionCause};
use crate::transport::{Connector, Link};

/// Requests from the application to its session task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Stamp with our nickname and send to the peer
    Send(Signal),
    VoiceProfile(String),
    EnterObstruction(ObstructionCause),
    ExitObstruction,
    Lifecycle(LifecycleSignal),
    SetExempt(bool),
    Collapse,
    Shutdown,
}

/// Weak so that dropping every [`SessionHandle`](crate::SessionHandle) still
/// closes the command channel and tears the session down.
pub(crate) struct ActiveSession {
    pub id: u64,
    pub commands: mpsc::WeakUnboundedSender<Command>,
}

/// Held while a session is running; at most one per device.
pub(crate) type PresenceLock = Arc<Mutex<Option<ActiveSession>>>;

pub(crate) struct Session {
    pub id: u64,
    pub address: String,
    pub nickname: Option<String>,
    pub config: ClientConfig,
    pub connector: Arc<dyn Connector>,
    pub media: Arc<dyn MediaEngine>,
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
    pub state: watch::Sender<EngineState>,
    pub lock: PresenceLock,
    pub obstruction: Obstruction,
    pub remote_nickname: Option<String>,
    pub role: Option<Role>,
    pub retry_count: u32,
    pub shutdown: bool,
    pub outbound: Option<mpsc::UnboundedSender<String>>,
}

async fn obstruction_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Session {
    pub(crate) async fn run(mut self) {
        info!("Declaring presence at {}", self.address);
        self.publish(Readiness::Waiting, None);
        let url = self.config.session_url(&self.address);
        let connector = self.connector.clone();

        while !self.shutdown {
            match self.wait_offline(connector.connect(&url)).await {
                Some(Ok(link)) => self.connected(link).await,
                Some(Err(e)) => warn!("Connecting to relay for {} failed: {}", self.address, e),
                None => break,
            }
            if self.shutdown {
                break;
            }

            self.publish(Readiness::Reconnecting, None);
            self.retry_count = self.retry_count.saturating_add(1);
            let delay = reconnect_delay(self.retry_count, self.config.max_reconnect_delay);
            info!(
                "Reconnecting {} in {:?} (attempt {})",
                self.address, delay, self.retry_count
            );
            if self.wait_offline(tokio::time::sleep(delay)).await.is_none() {
                break;
            }
            self.publish(Readiness::Waiting, None);
        }

        self.release_lock().await;
        debug!("Session task for {} finished", self.address);
    }

    /// Drive `fut` while no link is up, still serving commands and the
    /// obstruction deadline. Returns None once the session has shut down.
    async fn wait_offline<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            let deadline = self.obstruction.deadline();
            tokio::select! {
                out = &mut fut => return Some(out),
                cmd = self.commands.recv() => self.handle_command(cmd).await,
                _ = obstruction_deadline(deadline) => self.collapse(REASON_GRACE_EXPIRED).await,
            }
            if self.shutdown {
                return None;
            }
        }
    }

    async fn connected(&mut self, link: Link) {
        let Link { tx, mut rx, guard } = link;
        self.outbound = Some(tx);

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.obstruction.deadline();
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text).await,
                    Some(Err(e)) => {
                        warn!("Relay link for {} failed: {}", self.address, e);
                        break;
                    }
                    None => {
                        info!("Relay link for {} closed", self.address);
                        break;
                    }
                },
                cmd = self.commands.recv() => self.handle_command(cmd).await,
                _ = heartbeat.tick() => self.send(Signal::Ping),
                _ = obstruction_deadline(deadline) => self.collapse(REASON_GRACE_EXPIRED).await,
            }
            if self.shutdown {
                break;
            }
        }

        self.outbound = None;
        drop(guard);
    }

    // ============================================
    // Outbound
    // ============================================

    fn send(&self, signal: Signal) {
        let Some(outbound) = &self.outbound else {
            debug!("Not connected; dropping {}", signal.kind());
            return;
        };
        let kind = signal.kind();
        match Envelope::with_nickname(signal, self.nickname.clone()).encode() {
            Ok(json) => {
                if outbound.send(json).is_err() {
                    debug!("Relay writer gone; dropping {}", kind);
                }
            }
            Err(e) => warn!("Failed to encode {}: {}", kind, e),
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn publish(&self, readiness: Readiness, collapse_reason: Option<String>) {
        let state = EngineState {
            readiness,
            collapse_reason,
        };
        self.state.send_replace(state.clone());
        self.emit(SessionEvent::StateChanged(state));
    }

    // ============================================
    // Commands
    // ============================================

    async fn handle_command(&mut self, cmd: Option<Command>) {
        let Some(cmd) = cmd else {
            // every handle is gone
            self.teardown().await;
            return;
        };
        if self.shutdown {
            return;
        }

        match cmd {
            Command::Send(signal) => self.send(signal),
            Command::VoiceProfile(profile) => {
                self.send(Signal::VoiceMaskUpdate {
                    profile: profile.clone(),
                });
                self.media.set_voice_profile(&profile).await;
            }
            Command::EnterObstruction(cause) => {
                let seconds = self.config.grace_period.as_secs();
                self.enter_obstruction(cause, seconds, cause.is_local());
            }
            Command::ExitObstruction => self.exit_obstruction(true),
            Command::Lifecycle(signal) => self.on_lifecycle(signal),
            Command::SetExempt(exempt) => self.set_exempt(exempt),
            Command::Collapse => {
                self.send(Signal::Collapse {
                    reason: Some(REASON_USER_TERMINATED.to_string()),
                });
                self.collapse(REASON_USER_TERMINATED).await;
            }
            Command::Shutdown => self.teardown().await,
        }
    }

    fn on_lifecycle(&mut self, signal: LifecycleSignal) {
        let seconds = self.config.grace_period.as_secs();
        match signal {
            LifecycleSignal::FocusLost => {
                self.enter_obstruction(ObstructionCause::FocusLost, seconds, true)
            }
            LifecycleSignal::AttentionLost => {
                self.enter_obstruction(ObstructionCause::AttentionLost, seconds, true)
            }
            LifecycleSignal::Resumed | LifecycleSignal::AttentionRestored => {
                self.exit_obstruction(true)
            }
            LifecycleSignal::AttentionExempted => self.set_exempt(true),
            LifecycleSignal::AttentionExemptionCleared => self.set_exempt(false),
        }
    }

    // ============================================
    // Obstruction
    // ============================================

    fn enter_obstruction(&mut self, cause: ObstructionCause, seconds: u64, notify_peer: bool) {
        let opened = self
            .obstruction
            .enter(cause, seconds, Instant::now(), self.shutdown)
            .map(|window| (window.cause, window.seconds));
        let Some((cause, seconds)) = opened else {
            return;
        };

        info!("Obstruction ({:?}) opened for {}s", cause, seconds);
        self.emit(SessionEvent::ObstructionStarted { cause, seconds });
        if notify_peer {
            self.send(Signal::PeerObstructed {
                seconds,
                reason: Some(cause.as_reason().to_string()),
            });
        }
    }

    fn exit_obstruction(&mut self, notify_peer: bool) {
        if self.obstruction.exit().is_none() {
            return;
        }
        self.obstruction_cleared(notify_peer);
    }

    fn obstruction_cleared(&mut self, notify_peer: bool) {
        info!("Obstruction cleared");
        self.emit(SessionEvent::ObstructionCleared);
        if notify_peer {
            self.send(Signal::PeerRestored);
        }
    }

    fn set_exempt(&mut self, exempt: bool) {
        if let Some(window) = self.obstruction.set_exempt(exempt) {
            debug!("Attention exemption cleared obstruction ({:?})", window.cause);
            self.obstruction_cleared(true);
        }
    }

    // ============================================
    // Inbound
    // ============================================

    async fn handle_frame(&mut self, raw: &str) {
        if self.shutdown {
            return;
        }
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                return;
            }
        };
        self.retry_count = 0;

        if let Some(nick) = envelope.nickname {
            let is_local = self.nickname.as_deref() == Some(nick.as_str());
            let is_known = self.remote_nickname.as_deref() == Some(nick.as_str());
            if !is_local && !is_known {
                self.remote_nickname = Some(nick.clone());
                self.emit(SessionEvent::RemoteNickname(nick));
            }
        }

        match envelope.signal {
            Signal::Ready { role } => self.on_ready(role).await,
            Signal::WebrtcOffer { blob } => {
                if let Some(answer) = self.media.handle_remote_offer(blob).await {
                    self.send(Signal::WebrtcAnswer { blob: answer });
                }
            }
            Signal::WebrtcAnswer { blob } => self.media.handle_remote_answer(blob).await,
            Signal::WebrtcIce { blob } => self.media.add_ice_candidate(blob).await,
            Signal::Text { text } => self.emit(SessionEvent::RemoteText(text)),
            Signal::Hold { holding } => self.emit(SessionEvent::RemoteHold(holding)),
            Signal::Clear => self.emit(SessionEvent::RemoteClear),
            Signal::RevealFrame {
                data,
                width,
                height,
            } => match BASE64.decode(data.as_bytes()) {
                Ok(data) => self.emit(SessionEvent::RevealFrame {
                    data,
                    width,
                    height,
                }),
                Err(e) => warn!("Dropping reveal frame with bad payload: {}", e),
            },
            Signal::VoiceMaskUpdate { profile } => self.emit(SessionEvent::RemoteVoiceMask(profile)),
            Signal::PeerObstructed { seconds, .. } => {
                self.enter_obstruction(ObstructionCause::PeerReported, seconds, false)
            }
            Signal::PeerRestored => self.exit_obstruction(false),
            Signal::Collapse { reason } => {
                let reason = reason.unwrap_or_else(|| REASON_REMOTE_END.to_string());
                self.collapse(&reason).await;
            }
            Signal::Error { message } => {
                warn!("Relay rejected {}: {}", self.address, message);
                self.collapse(&message).await;
            }
            Signal::Pong => debug!("Heartbeat answered"),
            other => debug!("Ignoring {} from relay", other.kind()),
        }
    }

    async fn on_ready(&mut self, role: Role) {
        match self.role.replace(role) {
            Some(previous) => info!(
                "Re-paired at {} as {:?} (was {:?})",
                self.address, role, previous
            ),
            None => info!("Paired at {} as {:?}", self.address, role),
        }
        self.media.set_polite(role.is_polite()).await;
        self.media.warm_up().await;
        if !role.is_polite() {
            if let Some(offer) = self.media.create_offer().await {
                self.send(Signal::WebrtcOffer { blob: offer });
            }
        }
        self.publish(Readiness::Alive, None);
        // a fresh pairing ends a window the peer reported
        if self.obstruction.exit_if(|cause| !cause.is_local()).is_some() {
            self.obstruction_cleared(false);
        }
    }

    // ============================================
    // Teardown
    // ============================================

    /// Terminal: latch shutdown, drop media and the presence lock, report why.
    async fn collapse(&mut self, reason: &str) {
        let collapsed = self.state.borrow().collapse_reason.is_some();
        if collapsed {
            return;
        }
        self.shutdown = true;
        info!("Session at {} collapsed: {}", self.address, reason);
        self.obstruction.exit();
        self.media.dispose().await;
        self.remote_nickname = None;
        self.release_lock().await;
        self.publish(Readiness::Idle, Some(reason.to_string()));
        self.emit(SessionEvent::Collapsed {
            reason: reason.to_string(),
        });
    }

    /// Quiet teardown; the peer is not told.
    async fn teardown(&mut self) {
        if self.shutdown {
            return;
        }
        self.shutdown = true;
        info!("Session at {} shut down", self.address);
        self.obstruction.exit();
        self.media.dispose().await;
        self.remote_nickname = None;
        self.release_lock().await;
        self.publish(Readiness::Idle, None);
    }

    async fn release_lock(&self) {
        let mut active = self.lock.lock().await;
        if active.as_ref().map(|a| a.id) == Some(self.id) {
            *active = None;
        }
    }
}

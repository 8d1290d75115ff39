use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::info;
use presence_protocol::{Envelope, NegotiationBlob, Signal};
use tokio::sync::{mpsc, watch, Mutex};

use crate::address::generate_address;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::{EngineState, LifecycleSignal, SessionEvent};
use crate::media::MediaEngine;
use crate::obstruction::{Obstruction, ObstructionCause};
use crate::session::{ActiveSession, Command, PresenceLock, Session};
use crate::transport::{Connector, WsConnector};

/// Which negotiation message a locally produced blob belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationKind {
    Offer,
    Answer,
    Ice,
}

/// An address minted for later use, already registered with the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub address: String,
    pub nickname: String,
    pub hours: u32,
}

/// Device-level entry point. Owns the presence lock, so at most one session
/// runs per client.
pub struct PresenceClient {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    media: Arc<dyn MediaEngine>,
    lock: PresenceLock,
    exempt: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl PresenceClient {
    pub fn new(config: ClientConfig, media: Arc<dyn MediaEngine>) -> Self {
        let connector = Arc::new(WsConnector::new(config.connect_timeout));
        Self::with_connector(config, connector, media)
    }

    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        media: Arc<dyn MediaEngine>,
    ) -> Self {
        Self {
            config,
            connector,
            media,
            lock: Arc::new(Mutex::new(None)),
            exempt: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a session at `address`. Fails with `AlreadyActive` while another
    /// session from this client is still running.
    pub async fn declare_presence(
        &self,
        address: &str,
        nickname: Option<&str>,
    ) -> Result<SessionHandle, ClientError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ClientError::InvalidAddress(address.to_string()));
        }

        let mut active = self.lock.lock().await;
        if active.is_some() {
            return Err(ClientError::AlreadyActive);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(EngineState::default());

        let mut obstruction = Obstruction::default();
        obstruction.set_exempt(self.exempt.load(Ordering::SeqCst));

        let session = Session {
            id,
            address: address.to_string(),
            nickname: nickname.map(str::to_string),
            config: self.config.clone(),
            connector: self.connector.clone(),
            media: self.media.clone(),
            commands: cmd_rx,
            events: event_tx,
            state: state_tx,
            lock: self.lock.clone(),
            obstruction,
            remote_nickname: None,
            role: None,
            retry_count: 0,
            shutdown: false,
            outbound: None,
        };

        *active = Some(ActiveSession {
            id,
            commands: cmd_tx.downgrade(),
        });
        drop(active);
        tokio::spawn(session.run());

        Ok(SessionHandle {
            address: address.to_string(),
            commands: cmd_tx,
            events: event_rx,
            state: state_rx,
            exempt: self.exempt.clone(),
        })
    }

    /// Join a reserved address under `nickname` (uppercased).
    pub async fn join_from_registry(
        &self,
        address: &str,
        nickname: &str,
    ) -> Result<SessionHandle, ClientError> {
        let nickname = nickname.to_uppercase();
        self.declare_presence(address, Some(&nickname)).await
    }

    /// Mint a fresh address and register it with the relay for `hours`.
    pub async fn reserve_presence(
        &self,
        nickname: &str,
        hours: u32,
    ) -> Result<Reservation, ClientError> {
        let reservation = Reservation {
            address: generate_address(&mut rand::thread_rng()),
            nickname: nickname.to_uppercase(),
            hours,
        };
        self.registry_send(Signal::ReserveRequest {
            address: reservation.address.clone(),
            nickname: reservation.nickname.clone(),
            hours,
        })
        .await?;
        info!(
            "Reserved {} for {} ({}h)",
            reservation.address, reservation.nickname, hours
        );
        Ok(reservation)
    }

    pub async fn release_presence(&self, address: &str) -> Result<(), ClientError> {
        self.registry_send(Signal::ReleaseRequest {
            address: address.to_string(),
        })
        .await?;
        info!("Released {}", address);
        Ok(())
    }

    async fn registry_send(&self, signal: Signal) -> Result<(), ClientError> {
        let json = Envelope::new(signal).encode()?;
        let link = self.connector.connect(&self.config.registry_url()).await?;
        if !link.send(json) {
            return Err(ClientError::Transport("relay link closed".to_string()));
        }
        Ok(())
    }

    /// Standing attention exemption for this device; forwarded to the active
    /// session, if any.
    pub async fn set_attention_exempt(&self, exempt: bool) {
        self.exempt.store(exempt, Ordering::SeqCst);
        if let Some(active) = self.lock.lock().await.as_ref() {
            if let Some(commands) = active.commands.upgrade() {
                let _ = commands.send(Command::SetExempt(exempt));
            }
        }
    }

    pub fn attention_exempt(&self) -> bool {
        self.exempt.load(Ordering::SeqCst)
    }

    /// Whether a session currently holds the presence lock.
    pub async fn is_active(&self) -> bool {
        self.lock.lock().await.is_some()
    }
}

/// The application's side of one session.
pub struct SessionHandle {
    address: String,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    state: watch::Receiver<EngineState>,
    exempt: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Next event in arrival order; None once the session task is gone.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }

    fn command(&self, cmd: Command) -> Result<(), ClientError> {
        self.commands
            .send(cmd)
            .map_err(|_| ClientError::SessionClosed)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.command(Command::Send(Signal::Text { text: text.into() }))
    }

    pub fn send_hold(&self, holding: bool) -> Result<(), ClientError> {
        self.command(Command::Send(Signal::Hold { holding }))
    }

    pub fn send_clear(&self) -> Result<(), ClientError> {
        self.command(Command::Send(Signal::Clear))
    }

    pub fn send_reveal_frame(&self, frame: &[u8], width: u32, height: u32) -> Result<(), ClientError> {
        self.command(Command::Send(Signal::RevealFrame {
            data: BASE64.encode(frame),
            width,
            height,
        }))
    }

    pub fn send_webrtc_signal(
        &self,
        kind: NegotiationKind,
        blob: NegotiationBlob,
    ) -> Result<(), ClientError> {
        let signal = match kind {
            NegotiationKind::Offer => Signal::WebrtcOffer { blob },
            NegotiationKind::Answer => Signal::WebrtcAnswer { blob },
            NegotiationKind::Ice => Signal::WebrtcIce { blob },
        };
        self.command(Command::Send(signal))
    }

    /// Tell the peer which voice mask we use and apply it locally.
    pub fn sync_voice_profile(&self, profile: impl Into<String>) -> Result<(), ClientError> {
        self.command(Command::VoiceProfile(profile.into()))
    }

    pub fn enter_obstruction(&self, cause: ObstructionCause) -> Result<(), ClientError> {
        self.command(Command::EnterObstruction(cause))
    }

    pub fn exit_obstruction(&self) -> Result<(), ClientError> {
        self.command(Command::ExitObstruction)
    }

    pub fn lifecycle(&self, signal: LifecycleSignal) -> Result<(), ClientError> {
        match signal {
            LifecycleSignal::AttentionExempted => self.exempt.store(true, Ordering::SeqCst),
            LifecycleSignal::AttentionExemptionCleared => self.exempt.store(false, Ordering::SeqCst),
            _ => {}
        }
        self.command(Command::Lifecycle(signal))
    }

    /// End the session on the user's request and tell the peer.
    pub fn collapse(&self) -> Result<(), ClientError> {
        self.command(Command::Collapse)
    }

    /// Tear the session down without notifying the peer.
    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.command(Command::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use presence_protocol::{REASON_GRACE_EXPIRED, REASON_USER_TERMINATED};
    use serde_json::{json, Value};

    use super::*;
    use crate::events::Readiness;
    use crate::obstruction::MAX_WINDOW_SECS;
    use crate::transport::mock::{MockConnector, RelayEnd};

    #[derive(Default)]
    struct RecordingMedia {
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingMedia {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    #[async_trait]
    impl MediaEngine for RecordingMedia {
        async fn set_polite(&self, polite: bool) {
            self.record(&format!("polite:{}", polite));
        }
        async fn warm_up(&self) {
            self.record("warm_up");
        }
        async fn create_offer(&self) -> Option<NegotiationBlob> {
            self.record("offer");
            json!({"sdp": "local-offer"}).as_object().cloned()
        }
        async fn handle_remote_offer(&self, _offer: NegotiationBlob) -> Option<NegotiationBlob> {
            self.record("remote_offer");
            json!({"sdp": "local-answer"}).as_object().cloned()
        }
        async fn handle_remote_answer(&self, _answer: NegotiationBlob) {
            self.record("remote_answer");
        }
        async fn add_ice_candidate(&self, _candidate: NegotiationBlob) {
            self.record("ice");
        }
        async fn set_voice_profile(&self, profile: &str) {
            self.record(&format!("voice:{}", profile));
        }
        async fn dispose(&self) {
            self.record("dispose");
        }
    }

    struct Harness {
        client: PresenceClient,
        connector: Arc<MockConnector>,
        accepted: mpsc::UnboundedReceiver<RelayEnd>,
        media: Arc<RecordingMedia>,
    }

    fn harness() -> Harness {
        let (connector, accepted) = MockConnector::new();
        let connector = Arc::new(connector);
        let media = Arc::new(RecordingMedia::default());
        let client = PresenceClient::with_connector(
            ClientConfig::new("ws://relay.test/"),
            connector.clone(),
            media.clone(),
        );
        Harness {
            client,
            connector,
            accepted,
            media,
        }
    }

    async fn next_frame(relay: &mut RelayEnd) -> Value {
        let raw = relay.next_frame().await.expect("client closed link");
        serde_json::from_str(&raw).unwrap()
    }

    /// Skip heartbeat pings.
    async fn next_app_frame(relay: &mut RelayEnd) -> Value {
        loop {
            let frame = next_frame(relay).await;
            if frame["type"] != "ping" {
                return frame;
            }
        }
    }

    async fn wait_for(session: &mut SessionHandle, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        loop {
            let event = session.next_event().await.expect("session ended");
            if pred(&event) {
                return event;
            }
        }
    }

    async fn wait_readiness(session: &mut SessionHandle, readiness: Readiness) {
        wait_for(session, |e| {
            matches!(e, SessionEvent::StateChanged(s) if s.readiness == readiness)
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn second_declare_fails_while_active() {
        let mut h = harness();
        let session = h.client.declare_presence("ABC123", None).await.unwrap();
        let _relay = h.accepted.recv().await.unwrap();

        assert!(matches!(
            h.client.declare_presence("XYZ999", None).await,
            Err(ClientError::AlreadyActive)
        ));
        assert!(h.client.is_active().await);
        drop(session);
    }

    #[tokio::test(start_paused = true)]
    async fn connects_with_address_query() {
        let mut h = harness();
        let mut session = h.client.declare_presence("ABC123", None).await.unwrap();
        let relay = h.accepted.recv().await.unwrap();
        assert_eq!(relay.url, "ws://relay.test/?address=ABC123");
        wait_readiness(&mut session, Readiness::Waiting).await;
    }

    #[tokio::test(start_paused = true)]
    async fn initiator_warms_up_and_offers() {
        let mut h = harness();
        let mut session = h.client.declare_presence("ABC123", Some("ROO")).await.unwrap();
        let mut relay = h.accepted.recv().await.unwrap();

        relay.push(r#"{"type":"ready","role":"initiator"}"#);
        wait_readiness(&mut session, Readiness::Alive).await;

        let offer = next_app_frame(&mut relay).await;
        assert_eq!(offer["type"], "webrtc_offer");
        assert_eq!(offer["sdp"], "local-offer");
        assert_eq!(offer["nickname"], "ROO");
        assert_eq!(h.media.calls(), vec!["polite:false", "warm_up", "offer"]);
    }

    #[tokio::test(start_paused = true)]
    async fn polite_peer_answers_remote_offer() {
        let mut h = harness();
        let mut session = h.client.declare_presence("ABC123", None).await.unwrap();
        let mut relay = h.accepted.recv().await.unwrap();

        relay.push(r#"{"type":"ready","role":"polite"}"#);
        wait_readiness(&mut session, Readiness::Alive).await;
        relay.push(r#"{"type":"webrtc_offer","sdp":"remote"}"#);

        let answer = next_app_frame(&mut relay).await;
        assert_eq!(answer["type"], "webrtc_answer");
        assert_eq!(answer["sdp"], "local-answer");
        assert_eq!(
            h.media.calls(),
            vec!["polite:true", "warm_up", "remote_offer"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_app_signals_become_events() {
        let mut h = harness();
        let mut session = h.client.declare_presence("ABC123", Some("ME")).await.unwrap();
        let relay = h.accepted.recv().await.unwrap();

        relay.push(r#"{"type":"text","text":"hi","nickname":"KIT"}"#);
        relay.push(r#"{"type":"hold","holding":true,"nickname":"KIT"}"#);
        relay.push(r#"{"type":"reveal_frame","data":"AQID","width":2,"height":1}"#);
        relay.push(r#"{"type":"voice_mask_update","profile":"robot"}"#);
        relay.push(r#"{"type":"clear"}"#);

        let mut seen = Vec::new();
        while seen.len() < 6 {
            match session.next_event().await.unwrap() {
                SessionEvent::StateChanged(_) => {}
                other => seen.push(other),
            }
        }
        assert_eq!(
            seen,
            vec![
                SessionEvent::RemoteNickname("KIT".to_string()),
                SessionEvent::RemoteText("hi".to_string()),
                SessionEvent::RemoteHold(true),
                SessionEvent::RevealFrame {
                    data: vec![1, 2, 3],
                    width: 2,
                    height: 1
                },
                SessionEvent::RemoteVoiceMask("robot".to_string()),
                SessionEvent::RemoteClear,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_signals_carry_nickname() {
        let mut h = harness();
        let session = h.client.join_from_registry("ABC123", "roo").await.unwrap();
        let mut relay = h.accepted.recv().await.unwrap();

        session.send_text("hello").unwrap();
        let frame = next_app_frame(&mut relay).await;
        assert_eq!(frame, json!({"type": "text", "text": "hello", "nickname": "ROO"}));

        session.send_reveal_frame(&[1, 2, 3], 2, 1).unwrap();
        let frame = next_app_frame(&mut relay).await;
        assert_eq!(frame["data"], "AQID");

        session.sync_voice_profile("robot").unwrap();
        let frame = next_app_frame(&mut relay).await;
        assert_eq!(frame["type"], "voice_mask_update");
        assert_eq!(frame["profile"], "robot");
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_pings_every_eight_seconds() {
        let mut h = harness();
        let _session = h.client.declare_presence("ABC123", None).await.unwrap();
        let mut relay = h.accepted.recv().await.unwrap();

        let start = tokio::time::Instant::now();
        assert_eq!(next_frame(&mut relay).await["type"], "ping");
        assert_eq!(start.elapsed(), Duration::from_secs(8));
        assert_eq!(next_frame(&mut relay).await["type"], "ping");
        assert_eq!(start.elapsed(), Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_backoff_and_resets_after_message() {
        let mut h = harness();
        let mut session = h.client.declare_presence("ABC123", None).await.unwrap();
        let relay = h.accepted.recv().await.unwrap();
        wait_readiness(&mut session, Readiness::Waiting).await;

        h.connector.fail_next(1);
        let start = tokio::time::Instant::now();
        drop(relay);
        wait_readiness(&mut session, Readiness::Reconnecting).await;

        // first retry after 2s fails, second after a further 4s succeeds
        let relay = h.accepted.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(6));

        // a parsed message resets the counter
        relay.push(r#"{"type":"pong"}"#);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let start = tokio::time::Instant::now();
        drop(relay);
        let _relay = h.accepted.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn obstruction_expiry_collapses_with_grace_expired() {
        let mut h = harness();
        let mut session = h.client.declare_presence("ABC123", None).await.unwrap();
        let mut relay = h.accepted.recv().await.unwrap();

        session.lifecycle(LifecycleSignal::FocusLost).unwrap();
        session.lifecycle(LifecycleSignal::AttentionLost).unwrap();
        let notice = next_app_frame(&mut relay).await;
        assert_eq!(notice["type"], "peer_obstructed");
        assert_eq!(notice["seconds"], 10);
        assert_eq!(notice["reason"], "app_lost_focus");

        let event = wait_for(&mut session, |e| matches!(e, SessionEvent::Collapsed { .. })).await;
        assert_eq!(
            event,
            SessionEvent::Collapsed {
                reason: REASON_GRACE_EXPIRED.to_string()
            }
        );
        assert_eq!(session.state().readiness, Readiness::Idle);
        assert_eq!(session.state().collapse_reason.as_deref(), Some(REASON_GRACE_EXPIRED));
        assert!(h.media.calls().contains(&"dispose".to_string()));
        assert!(!h.client.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn resuming_closes_window_and_notifies_peer() {
        let mut h = harness();
        let mut session = h.client.declare_presence("ABC123", None).await.unwrap();
        let mut relay = h.accepted.recv().await.unwrap();

        session.lifecycle(LifecycleSignal::FocusLost).unwrap();
        wait_for(&mut session, |e| matches!(e, SessionEvent::ObstructionStarted { .. })).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        session.lifecycle(LifecycleSignal::Resumed).unwrap();
        wait_for(&mut session, |e| *e == SessionEvent::ObstructionCleared).await;

        assert_eq!(next_app_frame(&mut relay).await["type"], "peer_obstructed");
        assert_eq!(next_app_frame(&mut relay).await["type"], "peer_restored");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(session.state().collapse_reason, None);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_notices_are_mirrored_without_echo() {
        let mut h = harness();
        let mut session = h.client.declare_presence("ABC123", None).await.unwrap();
        let mut relay = h.accepted.recv().await.unwrap();

        relay.push(r#"{"type":"peer_obstructed","seconds":7,"reason":"peer_left"}"#);
        let started = wait_for(&mut session, |e| matches!(e, SessionEvent::ObstructionStarted { .. })).await;
        assert_eq!(
            started,
            SessionEvent::ObstructionStarted {
                cause: ObstructionCause::PeerReported,
                seconds: 7
            }
        );

        // a fresh pairing closes the peer-reported window
        relay.push(r#"{"type":"ready","role":"polite"}"#);
        wait_for(&mut session, |e| *e == SessionEvent::ObstructionCleared).await;

        session.send_clear().unwrap();
        assert_eq!(next_app_frame(&mut relay).await["type"], "clear");
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_peer_window_is_capped_and_still_expires() {
        let mut h = harness();
        let mut session = h.client.declare_presence("ABC123", None).await.unwrap();
        let relay = h.accepted.recv().await.unwrap();

        relay.push(r#"{"type":"peer_obstructed","seconds":18446744073709551615}"#);
        let started = wait_for(&mut session, |e| matches!(e, SessionEvent::ObstructionStarted { .. })).await;
        assert_eq!(
            started,
            SessionEvent::ObstructionStarted {
                cause: ObstructionCause::PeerReported,
                seconds: MAX_WINDOW_SECS
            }
        );

        let event = wait_for(&mut session, |e| matches!(e, SessionEvent::Collapsed { .. })).await;
        assert_eq!(
            event,
            SessionEvent::Collapsed {
                reason: REASON_GRACE_EXPIRED.to_string()
            }
        );
        assert!(!h.client.is_active().await);
        assert!(h.client.declare_presence("ABC123", None).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn exemption_suppresses_and_clears_obstruction() {
        let mut h = harness();
        let mut session = h.client.declare_presence("ABC123", None).await.unwrap();
        let mut relay = h.accepted.recv().await.unwrap();

        session.lifecycle(LifecycleSignal::AttentionLost).unwrap();
        wait_for(&mut session, |e| matches!(e, SessionEvent::ObstructionStarted { .. })).await;
        session.lifecycle(LifecycleSignal::AttentionExempted).unwrap();
        wait_for(&mut session, |e| *e == SessionEvent::ObstructionCleared).await;
        assert!(h.client.attention_exempt());

        assert_eq!(next_app_frame(&mut relay).await["type"], "peer_obstructed");
        assert_eq!(next_app_frame(&mut relay).await["type"], "peer_restored");

        // while exempt, losing attention does nothing
        session.lifecycle(LifecycleSignal::AttentionLost).unwrap();
        session.send_hold(true).unwrap();
        assert_eq!(next_app_frame(&mut relay).await["type"], "hold");

        h.client.set_attention_exempt(false).await;
        session.lifecycle(LifecycleSignal::AttentionLost).unwrap();
        assert_eq!(next_app_frame(&mut relay).await["type"], "peer_obstructed");
    }

    #[tokio::test(start_paused = true)]
    async fn user_collapse_notifies_peer_and_frees_lock() {
        let mut h = harness();
        let mut session = h.client.declare_presence("ABC123", None).await.unwrap();
        let mut relay = h.accepted.recv().await.unwrap();

        session.collapse().unwrap();
        let frame = next_app_frame(&mut relay).await;
        assert_eq!(frame, json!({"type": "collapse", "reason": "user_terminated"}));

        let event = wait_for(&mut session, |e| matches!(e, SessionEvent::Collapsed { .. })).await;
        assert_eq!(
            event,
            SessionEvent::Collapsed {
                reason: REASON_USER_TERMINATED.to_string()
            }
        );
        assert!(!h.client.is_active().await);
        assert!(h.client.declare_presence("ABC123", None).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_collapse_is_terminal() {
        let mut h = harness();
        let mut session = h.client.declare_presence("ABC123", None).await.unwrap();
        let relay = h.accepted.recv().await.unwrap();

        relay.push(r#"{"type":"collapse"}"#);
        let event = wait_for(&mut session, |e| matches!(e, SessionEvent::Collapsed { .. })).await;
        assert_eq!(
            event,
            SessionEvent::Collapsed {
                reason: "remote_end".to_string()
            }
        );

        // no reconnect after a terminal collapse
        drop(relay);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(h.accepted.try_recv().is_err());
        assert!(matches!(session.send_text("late"), Err(ClientError::SessionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn admission_error_collapses_with_wire_code() {
        let mut h = harness();
        let mut session = h.client.declare_presence("FULL1", None).await.unwrap();
        let relay = h.accepted.recv().await.unwrap();

        relay.push(r#"{"type":"error","message":"room_full"}"#);
        let event = wait_for(&mut session, |e| matches!(e, SessionEvent::Collapsed { .. })).await;
        assert_eq!(
            event,
            SessionEvent::Collapsed {
                reason: "room_full".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_silent() {
        let mut h = harness();
        let mut session = h.client.declare_presence("ABC123", None).await.unwrap();
        let mut relay = h.accepted.recv().await.unwrap();

        session.shutdown().unwrap();
        wait_readiness(&mut session, Readiness::Idle).await;
        assert_eq!(relay.next_frame().await, None);
        assert_eq!(session.state().collapse_reason, None);
        assert!(!h.client.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_client_and_handle_tears_session_down() {
        let mut h = harness();
        let session = h.client.declare_presence("ABC123", None).await.unwrap();
        let mut relay = h.accepted.recv().await.unwrap();
        let lock = h.client.lock.clone();
        let mut state = session.watch_state();

        drop(h.client);
        drop(session);
        while state.borrow_and_update().readiness != Readiness::Idle {
            state.changed().await.unwrap();
        }
        assert_eq!(state.borrow().collapse_reason, None);
        assert_eq!(relay.next_frame().await, None);
        assert!(lock.lock().await.is_none());

        // no reconnect once torn down
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(h.accepted.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reserve_sends_registry_request() {
        let mut h = harness();
        let reservation = h.client.reserve_presence("roo", 24).await.unwrap();
        assert_eq!(reservation.nickname, "ROO");
        assert_eq!(reservation.hours, 24);

        let mut relay = h.accepted.recv().await.unwrap();
        assert_eq!(relay.url, "ws://relay.test/?mode=registry");
        let frame = next_frame(&mut relay).await;
        assert_eq!(frame["type"], "reserve_request");
        assert_eq!(frame["address"], reservation.address.as_str());
        assert_eq!(frame["nickname"], "ROO");

        h.client.release_presence(&reservation.address).await.unwrap();
        let mut relay = h.accepted.recv().await.unwrap();
        let frame = next_frame(&mut relay).await;
        assert_eq!(frame["type"], "release_request");
    }
}

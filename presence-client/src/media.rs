use async_trait::async_trait;
use presence_protocol::NegotiationBlob;

/// The peer-to-peer media stack driven by a session.
///
/// Negotiation blobs are opaque to the session; it only routes them between
/// the relay and this engine. Locally gathered ICE candidates go out through
/// [`crate::SessionHandle::send_webrtc_signal`].
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Polite peers yield on offer collisions.
    async fn set_polite(&self, polite: bool);
    async fn warm_up(&self);
    async fn create_offer(&self) -> Option<NegotiationBlob>;
    /// Apply a remote offer and return the answer to send back, if any.
    async fn handle_remote_offer(&self, offer: NegotiationBlob) -> Option<NegotiationBlob>;
    async fn handle_remote_answer(&self, answer: NegotiationBlob);
    async fn add_ice_candidate(&self, candidate: NegotiationBlob);
    async fn set_voice_profile(&self, profile: &str);
    async fn dispose(&self);
}

/// Media engine that does nothing; for signaling-only sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMedia;

#[async_trait]
impl MediaEngine for NullMedia {
    async fn set_polite(&self, _polite: bool) {}
    async fn warm_up(&self) {}
    async fn create_offer(&self) -> Option<NegotiationBlob> {
        None
    }
    async fn handle_remote_offer(&self, _offer: NegotiationBlob) -> Option<NegotiationBlob> {
        None
    }
    async fn handle_remote_answer(&self, _answer: NegotiationBlob) {}
    async fn add_ice_candidate(&self, _candidate: NegotiationBlob) {}
    async fn set_voice_profile(&self, _profile: &str) {}
    async fn dispose(&self) {}
}

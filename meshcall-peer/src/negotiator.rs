use std::sync::Arc;

use async_trait::async_trait;
use meshcall_core::{IceCandidate, PeerId, SessionDescription};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

/// An error reported by the media negotiation capability.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct NegotiationError(pub String);

impl NegotiationError {
    pub fn new(message: impl ToString) -> Self {
        Self(message.to_string())
    }
}

/// The connection state as reported by the negotiation capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    /// Connectivity was lost, but may come back
    Disconnected,
    Failed,
    Closed,
}

/// A reference to media received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMedia {
    pub stream_id: String,
    pub track_id: String,
    /// "audio" or "video"
    pub kind: String,
}

#[derive(Debug)]
pub(crate) enum NegotiationEvent {
    IceCandidate(IceCandidate),
    RemoteTrack(RemoteMedia),
    StateChanged(TransportState),
}

/// The callbacks a negotiator reports through. Handed over when the negotiator is created.
#[derive(Debug, Clone)]
pub struct NegotiationEvents {
    sender: UnboundedSender<NegotiationEvent>,
}

impl NegotiationEvents {
    pub(crate) fn new(sender: UnboundedSender<NegotiationEvent>) -> Self {
        Self { sender }
    }

    /// A handle that discards everything, for negotiators used outside a session.
    pub fn detached() -> Self {
        let (sender, _) = unbounded_channel();
        Self { sender }
    }

    /// A local connectivity candidate was gathered and should be sent to the peer.
    pub fn on_ice_candidate(&self, candidate: IceCandidate) {
        self.emit(NegotiationEvent::IceCandidate(candidate))
    }

    /// Media arrived from the peer.
    pub fn on_remote_track(&self, media: RemoteMedia) {
        self.emit(NegotiationEvent::RemoteTrack(media))
    }

    /// The connection state changed.
    pub fn on_state_change(&self, state: TransportState) {
        self.emit(NegotiationEvent::StateChanged(state))
    }

    fn emit(&self, event: NegotiationEvent) {
        // The session is gone, nothing left to inform
        self.sender.send(event).ok();
    }
}

/// The media negotiation capability behind one mesh edge.
///
/// Implementations own the actual peer connection. Everything here may be called from the
/// edge's task only, but the trait is `Sync` so teardown can close it from outside.
#[async_trait]
pub trait Negotiator: Send + Sync {
    /// Attaches the local media that should be sent to the peer.
    async fn attach_local_media(&self) -> Result<(), NegotiationError>;

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    /// May fail when the candidate arrives before the remote description.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    /// Releases the connection and everything attached to it.
    async fn close(&self) -> Result<(), NegotiationError>;
}

/// Creates a negotiator for every new mesh edge.
#[async_trait]
pub trait NegotiatorFactory: Send + Sync {
    async fn create(
        &self,
        peer: &PeerId,
        events: NegotiationEvents,
    ) -> Result<Arc<dyn Negotiator>, NegotiationError>;
}

use std::sync::Arc;

use log::{debug, info, warn};
use meshcall_core::{ClientMessage, ClientSender, DescriptionSignal, PeerId, ServerMessage};

use crate::{LinkState, NegotiatorFactory, PeerSessionTable, Role, SessionCommand};

/// Keeps one session per room-mate and applies the initiator rule: the member that was
/// already present makes the offer, the member that joined answers.
pub struct MeshClient {
    local_id: PeerId,
    room_id: Option<String>,
    signals: ClientSender,
    sessions: PeerSessionTable,
}

impl MeshClient {
    pub fn new(local_id: PeerId, factory: Arc<dyn NegotiatorFactory>, signals: ClientSender) -> Self {
        Self {
            sessions: PeerSessionTable::new(local_id.clone(), factory, signals.clone()),
            local_id,
            room_id: None,
            signals,
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn sessions(&self) -> &PeerSessionTable {
        &self.sessions
    }

    /// The local member created the room and is alone in it.
    pub fn hosted(&mut self, room_id: &str) {
        info!("Hosting room {}", room_id);
        self.room_id = Some(room_id.to_string());
    }

    /// The local member was admitted. The listed members will each send an offer.
    pub async fn joined(&mut self, room_id: &str, peers: &[PeerId]) {
        info!("Joined room {} with {} other member(s)", room_id, peers.len());
        self.room_id = Some(room_id.to_string());

        for peer in peers.iter().filter(|p| **p != self.local_id) {
            if let Err(e) = self.sessions.ensure_session(peer, Role::Answerer).await {
                warn!("Could not prepare edge to {}: {}", peer, e);
            }
        }
    }

    /// Applies a message received from the server.
    pub async fn handle(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Welcome(notice) => {
                debug!("Server knows us as {}", notice.peer_id);
            }
            ServerMessage::PeerJoined(notice) => self.offer_to(notice.peer_id).await,
            ServerMessage::PeerLeft(notice) => {
                if !self.sessions.teardown(&notice.peer_id).await {
                    debug!("{} left without an edge to us", notice.peer_id);
                }
            }
            ServerMessage::WebrtcOffer(signal) => self.accept_offer(signal).await,
            ServerMessage::WebrtcAnswer(signal) => {
                self.forward(&signal.from, SessionCommand::ReceiveAnswer(signal.sdp));
            }
            ServerMessage::WebrtcIce(signal) => {
                self.forward(&signal.from, SessionCommand::ReceiveCandidate(signal.candidate));
            }
        }
    }

    /// Leaves the room and closes every edge.
    pub async fn leave(&mut self) {
        if let Some(room_id) = self.room_id.take() {
            info!("Leaving room {}", room_id);
            self.signals.send(ClientMessage::LeaveRoom).ok();
        }

        self.sessions.teardown_all().await;
    }

    /// The signaling transport is gone. The server treats this as a leave.
    pub async fn disconnected(&mut self) {
        self.room_id = None;
        self.sessions.teardown_all().await;
    }

    async fn offer_to(&mut self, peer: PeerId) {
        if peer == self.local_id {
            return;
        }

        match self.sessions.ensure_session(&peer, Role::Offerer).await {
            Ok(session) => {
                session.dispatch(SessionCommand::Offer);
            }
            Err(e) => warn!("Could not open edge to {}: {}", peer, e),
        }
    }

    async fn accept_offer(&mut self, signal: DescriptionSignal) {
        let peer = signal.from;

        let glare = self
            .sessions
            .get(&peer)
            .is_some_and(|s| s.role() == Role::Offerer && s.state() != LinkState::Closed);

        if glare {
            warn!("Dropping offer from {}, we are offering ourselves", peer);
            return;
        }

        match self.sessions.ensure_session(&peer, Role::Answerer).await {
            Ok(session) => {
                session.dispatch(SessionCommand::ReceiveOffer(signal.sdp));
            }
            Err(e) => warn!("Could not answer {}: {}", peer, e),
        }
    }

    fn forward(&self, peer: &PeerId, command: SessionCommand) {
        let delivered = self
            .sessions
            .get(peer)
            .is_some_and(|session| session.dispatch(command));

        if !delivered {
            debug!("No live edge to {}, dropping message", peer);
        }
    }
}

use std::sync::Arc;

use log::{debug, info, warn};
use meshcall_core::{
    CandidateSignal, ClientMessage, ClientSender, DescriptionSignal, IceCandidate, Id, PeerId,
    SessionDescription,
};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        watch,
    },
    task::JoinHandle,
};

use crate::{
    NegotiationError, NegotiationEvent, NegotiationEvents, Negotiator, NegotiatorFactory,
    RemoteMedia, TransportState,
};

/// Identifies one incarnation of a mesh edge. A replaced edge gets a fresh id.
pub type SessionId = Id<PeerSession>;

/// The lifecycle of a mesh edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Negotiating,
    Connected,
    Closed,
}

/// Which side of the handshake the local member plays on an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The member that was already in the room
    Offerer,
    /// The member that joined
    Answerer,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: LinkState,
    },
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
}

#[derive(Debug)]
pub(crate) enum SessionCommand {
    Offer,
    ReceiveOffer(SessionDescription),
    ReceiveAnswer(SessionDescription),
    ReceiveCandidate(IceCandidate),
}

/// The local half of a mesh edge: one negotiation with one remote peer.
pub struct PeerSession {
    id: SessionId,
    local_id: PeerId,
    peer_id: PeerId,
    negotiator: Arc<dyn Negotiator>,
    state: Arc<watch::Sender<LinkState>>,
    remote_media: Arc<Mutex<Vec<RemoteMedia>>>,
    signals: ClientSender,
}

impl PeerSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub async fn create_offer(&self) -> Result<(), SessionError> {
        self.expect_state("create an offer", LinkState::Idle)?;
        self.transition(LinkState::Negotiating);

        self.negotiator.attach_local_media().await?;
        let offer = self.negotiator.create_offer().await?;
        self.negotiator.set_local_description(offer.clone()).await?;

        self.send(ClientMessage::WebrtcOffer(DescriptionSignal {
            to: self.peer_id.clone(),
            from: self.local_id.clone(),
            sdp: offer,
        }));

        Ok(())
    }

    pub async fn receive_offer(&self, offer: SessionDescription) -> Result<(), SessionError> {
        self.expect_state("accept an offer", LinkState::Idle)?;
        self.transition(LinkState::Negotiating);

        self.negotiator.attach_local_media().await?;
        self.negotiator.set_remote_description(offer).await?;
        let answer = self.negotiator.create_answer().await?;
        self.negotiator
            .set_local_description(answer.clone())
            .await?;

        self.send(ClientMessage::WebrtcAnswer(DescriptionSignal {
            to: self.peer_id.clone(),
            from: self.local_id.clone(),
            sdp: answer,
        }));

        Ok(())
    }

    pub async fn receive_answer(&self, answer: SessionDescription) -> Result<(), SessionError> {
        self.expect_state("accept an answer", LinkState::Negotiating)?;
        self.negotiator.set_remote_description(answer).await?;

        Ok(())
    }

    /// Candidates that cannot be applied are discarded, the edge stays usable.
    pub async fn receive_candidate(&self, candidate: IceCandidate) {
        if self.state() == LinkState::Closed {
            return;
        }

        if let Err(e) = self.negotiator.add_ice_candidate(candidate).await {
            debug!("Discarding candidate from {}: {}", self.peer_id, e);
        }
    }

    /// Returns false when the edge should stop.
    pub(crate) async fn execute(&self, command: SessionCommand) -> bool {
        let result = match command {
            SessionCommand::Offer => self.create_offer().await,
            SessionCommand::ReceiveOffer(offer) => self.receive_offer(offer).await,
            SessionCommand::ReceiveAnswer(answer) => self.receive_answer(answer).await,
            SessionCommand::ReceiveCandidate(candidate) => {
                self.receive_candidate(candidate).await;
                Ok(())
            }
        };

        match result {
            Ok(()) => true,
            Err(e @ SessionError::InvalidTransition { .. }) => {
                warn!("Ignoring message from {}: {}", self.peer_id, e);
                true
            }
            Err(SessionError::Negotiation(e)) => {
                warn!("Negotiation with {} failed: {}", self.peer_id, e);
                false
            }
        }
    }

    /// Returns false when the edge should stop.
    pub(crate) fn handle_event(&self, event: NegotiationEvent) -> bool {
        match event {
            NegotiationEvent::IceCandidate(candidate) => {
                self.send(ClientMessage::WebrtcIce(CandidateSignal {
                    to: self.peer_id.clone(),
                    from: self.local_id.clone(),
                    candidate,
                }));
            }
            NegotiationEvent::RemoteTrack(media) => {
                debug!(
                    "Receiving {} track {} from {}",
                    media.kind, media.track_id, self.peer_id
                );
                self.remote_media.lock().push(media);
            }
            NegotiationEvent::StateChanged(state) => match state {
                TransportState::Connected => {
                    if self.state() == LinkState::Negotiating {
                        info!("Connected to {}", self.peer_id);
                        self.transition(LinkState::Connected);
                    }
                }
                TransportState::Failed | TransportState::Closed => {
                    info!("Connection to {} ended ({:?})", self.peer_id, state);
                    return false;
                }
                TransportState::Disconnected => {
                    debug!("Connection to {} interrupted", self.peer_id);
                }
                TransportState::New | TransportState::Connecting => {}
            },
        }

        true
    }

    pub(crate) async fn close(&self) {
        if let Err(e) = self.negotiator.close().await {
            debug!("Error while closing connection to {}: {}", self.peer_id, e);
        }

        self.remote_media.lock().clear();
        self.transition(LinkState::Closed);
    }

    fn expect_state(&self, action: &'static str, expected: LinkState) -> Result<(), SessionError> {
        let state = self.state();

        if state != expected {
            return Err(SessionError::InvalidTransition { action, state });
        }

        Ok(())
    }

    fn transition(&self, to: LinkState) {
        let from = self.state.send_replace(to);

        if from != to {
            debug!("Edge {} to {}: {:?} -> {:?}", self.id, self.peer_id, from, to);
        }
    }

    fn send(&self, message: ClientMessage) {
        if self.signals.send(message).is_err() {
            debug!("Signaling is gone, dropping message for {}", self.peer_id);
        }
    }
}

/// Drives one session until the negotiation fails, the transport ends, or the handle is dropped.
async fn run(
    session: PeerSession,
    mut commands: UnboundedReceiver<SessionCommand>,
    mut events: UnboundedReceiver<NegotiationEvent>,
) {
    loop {
        let keep_running = tokio::select! {
            Some(command) = commands.recv() => session.execute(command).await,
            Some(event) = events.recv() => session.handle_event(event),
            else => false,
        };

        if !keep_running {
            break;
        }
    }

    session.close().await;
}

/// The owner's view of a running [PeerSession].
pub struct PeerSessionHandle {
    id: SessionId,
    peer_id: PeerId,
    role: Role,
    commands: UnboundedSender<SessionCommand>,
    state: Arc<watch::Sender<LinkState>>,
    negotiator: Arc<dyn Negotiator>,
    remote_media: Arc<Mutex<Vec<RemoteMedia>>>,
    task: JoinHandle<()>,
}

impl PeerSessionHandle {
    pub(crate) async fn spawn(
        local_id: PeerId,
        peer_id: PeerId,
        role: Role,
        factory: &dyn NegotiatorFactory,
        signals: ClientSender,
    ) -> Result<Self, SessionError> {
        let (event_sender, event_receiver) = unbounded_channel();
        let (command_sender, command_receiver) = unbounded_channel();

        let negotiator = factory
            .create(&peer_id, NegotiationEvents::new(event_sender))
            .await?;

        let (state, _) = watch::channel(LinkState::Idle);
        let state = Arc::new(state);
        let remote_media: Arc<Mutex<Vec<RemoteMedia>>> = Default::default();

        let session = PeerSession {
            id: SessionId::new(),
            local_id,
            peer_id: peer_id.clone(),
            negotiator: negotiator.clone(),
            state: state.clone(),
            remote_media: remote_media.clone(),
            signals,
        };

        let id = session.id();
        debug!("Edge {} to {} created as {:?}", id, peer_id, role);

        let task = tokio::spawn(run(session, command_receiver, event_receiver));

        Ok(Self {
            id,
            peer_id,
            role,
            commands: command_sender,
            state,
            negotiator,
            remote_media,
            task,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Observes state changes of this edge, ending in [LinkState::Closed].
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub fn remote_media(&self) -> Vec<RemoteMedia> {
        self.remote_media.lock().clone()
    }

    /// Returns false if the session has already stopped.
    pub(crate) fn dispatch(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Cancels the session task and releases the connection, whatever state it was in.
    pub(crate) async fn shutdown(&mut self) {
        self.task.abort();
        (&mut self.task).await.ok();

        if let Err(e) = self.negotiator.close().await {
            debug!("Error while closing connection to {}: {}", self.peer_id, e);
        }

        self.remote_media.lock().clear();
        self.state.send_replace(LinkState::Closed);
    }
}

impl Drop for PeerSessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::sleep;

    use crate::testing::{candidate_from, next_signal, wait_for_state, FakeFactory};

    use super::*;

    async fn session(factory: &FakeFactory, role: Role) -> (PeerSessionHandle, UnboundedReceiver<ClientMessage>) {
        let (signals, outgoing) = unbounded_channel();
        let handle = PeerSessionHandle::spawn(
            PeerId::from("local"),
            PeerId::from("remote"),
            role,
            factory,
            signals,
        )
        .await
        .expect("session spawns");

        (handle, outgoing)
    }

    #[tokio::test]
    async fn test_offerer_sends_offer_then_candidates() {
        let factory = FakeFactory::default();
        let (handle, mut outgoing) = session(&factory, Role::Offerer).await;

        handle.dispatch(SessionCommand::Offer);

        let ClientMessage::WebrtcOffer(offer) = next_signal(&mut outgoing).await else {
            panic!("expected an offer first");
        };
        assert_eq!(offer.to, PeerId::from("remote"));
        assert_eq!(offer.from, PeerId::from("local"));
        assert_eq!(handle.state(), LinkState::Negotiating);

        assert!(matches!(
            next_signal(&mut outgoing).await,
            ClientMessage::WebrtcIce(_)
        ));

        let answer = json!({ "type": "answer", "sdp": "remote" });
        handle.dispatch(SessionCommand::ReceiveAnswer(answer));

        wait_for_state(&mut handle.subscribe(), LinkState::Connected).await;
    }

    #[tokio::test]
    async fn test_answerer_replies_to_offer() {
        let factory = FakeFactory::default();
        let (handle, mut outgoing) = session(&factory, Role::Answerer).await;

        let offer = json!({ "type": "offer", "sdp": "remote" });
        handle.dispatch(SessionCommand::ReceiveOffer(offer.clone()));

        let ClientMessage::WebrtcAnswer(answer) = next_signal(&mut outgoing).await else {
            panic!("expected an answer");
        };
        assert_eq!(answer.to, PeerId::from("remote"));
        assert_eq!(factory.negotiator(0).remote_description(), Some(offer));

        wait_for_state(&mut handle.subscribe(), LinkState::Connected).await;
    }

    #[tokio::test]
    async fn test_early_candidate_is_discarded() {
        let factory = FakeFactory::default();
        let (handle, mut outgoing) = session(&factory, Role::Answerer).await;

        // Arrives before the offer, so the negotiator rejects it
        handle.dispatch(SessionCommand::ReceiveCandidate(candidate_from("remote")));
        handle.dispatch(SessionCommand::ReceiveOffer(json!({ "type": "offer" })));

        assert!(matches!(
            next_signal(&mut outgoing).await,
            ClientMessage::WebrtcAnswer(_)
        ));
        wait_for_state(&mut handle.subscribe(), LinkState::Connected).await;

        handle.dispatch(SessionCommand::ReceiveCandidate(candidate_from("remote")));
        sleep(Duration::from_millis(20)).await;

        assert_eq!(factory.negotiator(0).applied_candidates(), 1);
    }

    #[tokio::test]
    async fn test_unexpected_answer_is_ignored() {
        let factory = FakeFactory::default();
        let (handle, _outgoing) = session(&factory, Role::Answerer).await;

        handle.dispatch(SessionCommand::ReceiveAnswer(json!({ "type": "answer" })));
        sleep(Duration::from_millis(20)).await;

        assert_eq!(handle.state(), LinkState::Idle);
        assert_eq!(factory.negotiator(0).remote_description(), None);
    }

    #[tokio::test]
    async fn test_negotiation_failure_closes_edge() {
        let factory = FakeFactory::failing_offers();
        let (handle, mut outgoing) = session(&factory, Role::Offerer).await;

        handle.dispatch(SessionCommand::Offer);

        wait_for_state(&mut handle.subscribe(), LinkState::Closed).await;
        assert!(factory.negotiator(0).is_closed());
        assert!(outgoing.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transport_failure_closes_edge() {
        let factory = FakeFactory::default();
        let (handle, _outgoing) = session(&factory, Role::Answerer).await;

        handle.dispatch(SessionCommand::ReceiveOffer(json!({ "type": "offer" })));
        wait_for_state(&mut handle.subscribe(), LinkState::Connected).await;

        // Interruptions are survivable
        factory.events(0).on_state_change(TransportState::Disconnected);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), LinkState::Connected);

        factory.events(0).on_state_change(TransportState::Failed);
        wait_for_state(&mut handle.subscribe(), LinkState::Closed).await;
        assert!(factory.negotiator(0).is_closed());
    }

    #[tokio::test]
    async fn test_remote_tracks_are_collected() {
        let factory = FakeFactory::default();
        let (handle, _outgoing) = session(&factory, Role::Answerer).await;

        let media = RemoteMedia {
            stream_id: "stream".into(),
            track_id: "audio-1".into(),
            kind: "audio".into(),
        };
        factory.events(0).on_remote_track(media.clone());
        sleep(Duration::from_millis(20)).await;

        assert_eq!(handle.remote_media(), vec![media]);
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let factory = FakeFactory::default();
        let (mut handle, _outgoing) = session(&factory, Role::Answerer).await;

        factory.events(0).on_remote_track(RemoteMedia {
            stream_id: "stream".into(),
            track_id: "video-1".into(),
            kind: "video".into(),
        });
        sleep(Duration::from_millis(20)).await;

        let mut state = handle.subscribe();
        handle.shutdown().await;

        assert_eq!(*state.borrow_and_update(), LinkState::Closed);
        assert!(handle.remote_media().is_empty());
        assert!(factory.negotiator(0).is_closed());
        assert!(!handle.dispatch(SessionCommand::Offer));
    }
}

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use log::info;
use meshcall_core::{ClientSender, PeerId};
use tokio::sync::watch;

use crate::{LinkState, NegotiatorFactory, PeerSessionHandle, RemoteMedia, Role, SessionError};

/// Every mesh edge of the local member, keyed by the remote peer.
pub struct PeerSessionTable {
    local_id: PeerId,
    factory: Arc<dyn NegotiatorFactory>,
    signals: ClientSender,
    sessions: HashMap<PeerId, PeerSessionHandle>,
}

impl PeerSessionTable {
    pub fn new(local_id: PeerId, factory: Arc<dyn NegotiatorFactory>, signals: ClientSender) -> Self {
        Self {
            local_id,
            factory,
            signals,
            sessions: Default::default(),
        }
    }

    /// Returns the live session for the peer, creating one if there is none.
    /// A closed session is replaced by a fresh one.
    pub async fn ensure_session(
        &mut self,
        peer: &PeerId,
        role: Role,
    ) -> Result<&PeerSessionHandle, SessionError> {
        let closed = self
            .sessions
            .get(peer)
            .is_some_and(|s| s.state() == LinkState::Closed);

        if closed {
            self.teardown(peer).await;
        }

        match self.sessions.entry(peer.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let session = PeerSessionHandle::spawn(
                    self.local_id.clone(),
                    peer.clone(),
                    role,
                    self.factory.as_ref(),
                    self.signals.clone(),
                )
                .await?;

                Ok(entry.insert(session))
            }
        }
    }

    /// Closes and forgets the session with the peer. Does nothing if there is none.
    pub async fn teardown(&mut self, peer: &PeerId) -> bool {
        match self.sessions.remove(peer) {
            Some(mut session) => {
                session.shutdown().await;
                info!("Closed edge {} to {}", session.id(), peer);
                true
            }
            None => false,
        }
    }

    pub async fn teardown_all(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.shutdown().await;
        }
    }

    pub fn get(&self, peer: &PeerId) -> Option<&PeerSessionHandle> {
        self.sessions.get(peer)
    }

    pub fn state(&self, peer: &PeerId) -> Option<LinkState> {
        self.sessions.get(peer).map(|s| s.state())
    }

    pub fn subscribe(&self, peer: &PeerId) -> Option<watch::Receiver<LinkState>> {
        self.sessions.get(peer).map(|s| s.subscribe())
    }

    pub fn remote_media(&self, peer: &PeerId) -> Vec<RemoteMedia> {
        self.sessions
            .get(peer)
            .map(|s| s.remote_media())
            .unwrap_or_default()
    }

    /// The peers there is a session with, in no particular order.
    pub fn peers(&self) -> Vec<PeerId> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

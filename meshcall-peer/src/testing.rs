use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use meshcall_core::{ClientMessage, IceCandidate, PeerId, SessionDescription};
use parking_lot::Mutex;
use serde_json::json;
use tokio::{sync::mpsc::UnboundedReceiver, sync::watch, time::timeout};

use crate::{
    LinkState, NegotiationError, NegotiationEvents, Negotiator, NegotiatorFactory, TransportState,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Pretends to connect as soon as both descriptions are in place.
pub struct FakeNegotiator {
    label: String,
    events: NegotiationEvents,
    fail_offers: bool,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    candidates: AtomicUsize,
    closed: AtomicBool,
}

impl FakeNegotiator {
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn applied_candidates(&self) -> usize {
        self.candidates.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn connect_if_ready(&self) {
        if self.local.lock().is_some() && self.remote.lock().is_some() {
            self.events.on_state_change(TransportState::Connected);
        }
    }
}

#[async_trait]
impl Negotiator for FakeNegotiator {
    async fn attach_local_media(&self) -> Result<(), NegotiationError> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        if self.fail_offers {
            return Err(NegotiationError::new("no codecs"));
        }

        Ok(json!({ "type": "offer", "sdp": self.label }))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        if self.remote.lock().is_none() {
            return Err(NegotiationError::new("no remote offer"));
        }

        Ok(json!({ "type": "answer", "sdp": self.label }))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        *self.local.lock() = Some(description);

        self.events.on_ice_candidate(candidate_from(&self.label));
        self.connect_if_ready();

        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        *self.remote.lock() = Some(description);
        self.connect_if_ready();

        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), NegotiationError> {
        if self.remote.lock().is_none() {
            return Err(NegotiationError::new("remote description not set"));
        }

        self.candidates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every negotiator it creates, in creation order.
#[derive(Default)]
pub struct FakeFactory {
    fail_offers: bool,
    created: Mutex<Vec<(Arc<FakeNegotiator>, NegotiationEvents)>>,
}

impl FakeFactory {
    pub fn failing_offers() -> Self {
        Self {
            fail_offers: true,
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn negotiator(&self, index: usize) -> Arc<FakeNegotiator> {
        self.created.lock()[index].0.clone()
    }

    /// The callbacks handed to the negotiator, to inject transport events.
    pub fn events(&self, index: usize) -> NegotiationEvents {
        self.created.lock()[index].1.clone()
    }
}

#[async_trait]
impl NegotiatorFactory for FakeFactory {
    async fn create(
        &self,
        peer: &PeerId,
        events: NegotiationEvents,
    ) -> Result<Arc<dyn Negotiator>, NegotiationError> {
        let negotiator = Arc::new(FakeNegotiator {
            label: format!("to {}", peer),
            events: events.clone(),
            fail_offers: self.fail_offers,
            local: Default::default(),
            remote: Default::default(),
            candidates: Default::default(),
            closed: Default::default(),
        });

        self.created.lock().push((negotiator.clone(), events));

        Ok(negotiator)
    }
}

pub fn candidate_from(label: &str) -> IceCandidate {
    json!({ "candidate": format!("candidate:{}", label), "sdpMid": "0" })
}

pub async fn next_signal(outgoing: &mut UnboundedReceiver<ClientMessage>) -> ClientMessage {
    timeout(TIMEOUT, outgoing.recv())
        .await
        .expect("signal in time")
        .expect("signaling open")
}

pub async fn wait_for_state(state: &mut watch::Receiver<LinkState>, target: LinkState) {
    timeout(TIMEOUT, state.wait_for(|s| *s == target))
        .await
        .expect("state reached in time")
        .expect("session alive");
}

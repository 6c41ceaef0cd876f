use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use meshcall_core::{Config, IceCandidate, PeerId, SessionDescription};
use meshcall_peer::{
    NegotiationError, NegotiationEvents, Negotiator, NegotiatorFactory, RemoteMedia,
    TransportState,
};
use tokio::sync::Mutex;
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors,
        media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8},
        APIBuilder, API,
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
    rtp_transceiver::rtp_codec::RTCRtpCodecCapability,
    track::track_local::{track_local_static_sample::TrackLocalStaticSample, TrackLocal},
};

/// Creates a [RtcNegotiator] per mesh edge.
///
/// The local tracks are created once and bound to every connection, so all room-mates
/// share the same outgoing media.
pub struct RtcNegotiatorFactory {
    api: API,
    ice_servers: Vec<String>,
    local_tracks: Vec<Arc<TrackLocalStaticSample>>,
}

impl RtcNegotiatorFactory {
    pub fn new(config: &Config) -> Result<Self, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(NegotiationError::new)?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(NegotiationError::new)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let local_tracks = vec![
            Self::local_track(MIME_TYPE_OPUS, "audio"),
            Self::local_track(MIME_TYPE_VP8, "video"),
        ];

        Ok(Self {
            api,
            ice_servers: config.ice_servers.clone(),
            local_tracks,
        })
    }

    fn local_track(mime_type: &str, id: &str) -> Arc<TrackLocalStaticSample> {
        Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.to_owned(),
            "meshcall".to_owned(),
        ))
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl NegotiatorFactory for RtcNegotiatorFactory {
    async fn create(
        &self,
        peer: &PeerId,
        events: NegotiationEvents,
    ) -> Result<Arc<dyn Negotiator>, NegotiationError> {
        let connection = self
            .api
            .new_peer_connection(self.configuration())
            .await
            .map_err(NegotiationError::new)?;

        let negotiator = RtcNegotiator::new(peer.clone(), connection, self.local_tracks.clone());

        negotiator.report_to(events);

        Ok(Arc::new(negotiator))
    }
}

/// A [Negotiator] backed by a `webrtc` peer connection.
pub struct RtcNegotiator {
    peer_id: PeerId,
    connection: Arc<RTCPeerConnection>,
    local_tracks: Vec<Arc<TrackLocalStaticSample>>,
    /// How many of the local tracks are already bound to the connection
    attached: Mutex<usize>,
}

impl RtcNegotiator {
    fn new(
        peer_id: PeerId,
        connection: RTCPeerConnection,
        local_tracks: Vec<Arc<TrackLocalStaticSample>>,
    ) -> Self {
        Self {
            peer_id,
            connection: Arc::new(connection),
            local_tracks,
            attached: Mutex::new(0),
        }
    }

    fn report_to(&self, events: NegotiationEvents) {
        let candidate_events = events.clone();
        let peer_id = self.peer_id.clone();

        self.connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = candidate_events.clone();
                let peer_id = peer_id.clone();

                Box::pin(async move {
                    // None marks the end of gathering
                    let Some(candidate) = candidate else {
                        return;
                    };

                    let encoded = candidate
                        .to_json()
                        .map_err(NegotiationError::new)
                        .and_then(|init| {
                            serde_json::to_value(init).map_err(NegotiationError::new)
                        });

                    match encoded {
                        Ok(candidate) => events.on_ice_candidate(candidate),
                        Err(e) => warn!("Could not encode candidate for {}: {}", peer_id, e),
                    }
                })
            }));

        let track_events = events.clone();
        self.connection
            .on_track(Box::new(move |track, _receiver, _transceiver| {
                track_events.on_remote_track(RemoteMedia {
                    stream_id: track.stream_id(),
                    track_id: track.id(),
                    kind: track.kind().to_string(),
                });

                Box::pin(async {})
            }));

        let peer_id = self.peer_id.clone();
        self.connection
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                debug!("Connection to {} is {}", peer_id, state);
                events.on_state_change(transport_state(state));

                Box::pin(async {})
            }));
    }
}

#[async_trait]
impl Negotiator for RtcNegotiator {
    async fn attach_local_media(&self) -> Result<(), NegotiationError> {
        let mut attached = self.attached.lock().await;

        // A failed attempt leaves the remaining tracks for the next call
        for track in self.local_tracks.iter().skip(*attached) {
            self.connection
                .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(NegotiationError::new)?;

            *attached += 1;
        }

        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(NegotiationError::new)?;

        serde_json::to_value(offer).map_err(NegotiationError::new)
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self
            .connection
            .create_answer(None)
            .await
            .map_err(NegotiationError::new)?;

        serde_json::to_value(answer).map_err(NegotiationError::new)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let description: RTCSessionDescription =
            serde_json::from_value(description).map_err(NegotiationError::new)?;

        self.connection
            .set_local_description(description)
            .await
            .map_err(NegotiationError::new)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let description: RTCSessionDescription =
            serde_json::from_value(description).map_err(NegotiationError::new)?;

        self.connection
            .set_remote_description(description)
            .await
            .map_err(NegotiationError::new)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let candidate: RTCIceCandidateInit =
            serde_json::from_value(candidate).map_err(NegotiationError::new)?;

        self.connection
            .add_ice_candidate(candidate)
            .await
            .map_err(NegotiationError::new)
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.connection.close().await.map_err(NegotiationError::new)
    }
}

fn transport_state(state: RTCPeerConnectionState) -> TransportState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => TransportState::New,
        RTCPeerConnectionState::Connecting => TransportState::Connecting,
        RTCPeerConnectionState::Connected => TransportState::Connected,
        RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
        RTCPeerConnectionState::Failed => TransportState::Failed,
        RTCPeerConnectionState::Closed => TransportState::Closed,
    }
}

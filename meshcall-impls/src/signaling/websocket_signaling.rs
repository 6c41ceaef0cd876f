use std::{sync::Arc, time::Duration};

use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use meshcall_core::{
    Ack, ClientMessage, ClientSender, Frame, PeerId, RoomRequest, ServerMessage,
};
use meshcall_peer::MeshClient;
use thiserror::Error;
use tokio::{
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    time::timeout,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("The server closed the connection")]
    Closed,
    #[error("The server did not send a welcome")]
    NoWelcome,
    #[error("No acknowledgement within {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Rejected(String),
}

type PendingAcks = DashMap<u64, oneshot::Sender<Ack>>;

/// A signaling connection to a meshcall server over WebSocket.
pub struct SignalingClient {
    peer_id: PeerId,
    frames: UnboundedSender<Frame>,
    signals: ClientSender,
    messages: UnboundedReceiver<ServerMessage>,
    pending: Arc<PendingAcks>,
    /// Set once the server side of the socket is gone
    closed: Arc<AtomicCell<bool>>,
    next_ack: AtomicCell<u64>,
}

impl SignalingClient {
    const ACK_TIMEOUT: Duration = Duration::from_secs(10);

    /// Connects to the gateway and waits for the server to assign a peer id.
    pub async fn connect(url: &str) -> Result<Self, SignalingError> {
        let (stream, _) = connect_async(url).await?;
        let (mut write, mut read) = stream.split();

        let (frame_sender, mut frame_receiver) = unbounded_channel::<Frame>();
        let (message_sender, mut messages) = unbounded_channel();
        let pending: Arc<PendingAcks> = Default::default();

        tokio::spawn(async move {
            while let Some(frame) = frame_receiver.recv().await {
                let text = match frame.to_text() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Could not encode frame: {}", e);
                        continue;
                    }
                };

                if write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }

            write.close().await.ok();
        });

        let closed: Arc<AtomicCell<bool>> = Default::default();

        let acks = pending.clone();
        let reader_closed = closed.clone();
        tokio::spawn(async move {
            while let Some(Ok(message)) = read.next().await {
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };

                let frame = match Frame::parse(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Ignoring frame from server: {}", e);
                        continue;
                    }
                };

                if frame.event == Frame::ACK_EVENT {
                    if let Some((id, ack)) = frame.into_ack() {
                        if let Some((_, waiter)) = acks.remove(&id) {
                            waiter.send(ack).ok();
                        }
                    }
                    continue;
                }

                match ServerMessage::from_frame(frame) {
                    Ok(message) => {
                        if message_sender.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring message from server: {}", e),
                }
            }

            // Dropping the waiters fails every request still in flight
            reader_closed.store(true);
            acks.clear();

            debug!("Signaling connection closed");
        });

        let peer_id = match messages.recv().await {
            Some(ServerMessage::Welcome(notice)) => notice.peer_id,
            Some(_) => return Err(SignalingError::NoWelcome),
            None => return Err(SignalingError::Closed),
        };

        let (signals, mut signal_receiver) = unbounded_channel::<ClientMessage>();
        let signal_frames = frame_sender.clone();
        tokio::spawn(async move {
            while let Some(message) = signal_receiver.recv().await {
                if signal_frames.send(message.into_frame(None)).is_err() {
                    break;
                }
            }
        });

        debug!("Connected to {} as {}", url, peer_id);

        Ok(Self {
            peer_id,
            frames: frame_sender,
            signals,
            messages,
            pending,
            closed,
            next_ack: AtomicCell::new(1),
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// The channel a [MeshClient] sends its negotiation messages through.
    pub fn sender(&self) -> ClientSender {
        self.signals.clone()
    }

    pub async fn host_room(&self, room_id: &str, password: &str) -> Result<(), SignalingError> {
        let request = RoomRequest {
            room_id: room_id.to_string(),
            password: password.to_string(),
        };

        self.request(ClientMessage::HostRoom(request)).await?;
        Ok(())
    }

    /// Joins a room and returns the members that were already in it.
    pub async fn join_room(
        &self,
        room_id: &str,
        password: &str,
    ) -> Result<Vec<PeerId>, SignalingError> {
        let request = RoomRequest {
            room_id: room_id.to_string(),
            password: password.to_string(),
        };

        let ack = self.request(ClientMessage::JoinRoom(request)).await?;
        Ok(ack.peers.unwrap_or_default())
    }

    /// Sends a message that expects no acknowledgement.
    pub fn send(&self, message: ClientMessage) -> Result<(), SignalingError> {
        self.frames
            .send(message.into_frame(None))
            .map_err(|_| SignalingError::Closed)
    }

    /// Waits for the next message from the server. Returns None once the connection is gone.
    pub async fn next_message(&mut self) -> Option<ServerMessage> {
        self.messages.recv().await
    }

    /// Feeds server messages into the mesh until the connection ends.
    pub async fn drive(&mut self, mesh: &mut MeshClient) {
        while let Some(message) = self.next_message().await {
            mesh.handle(message).await;
        }

        mesh.disconnected().await;
    }

    async fn request(&self, message: ClientMessage) -> Result<Ack, SignalingError> {
        let id = self.next_ack.fetch_add(1);
        let (waiter, response) = oneshot::channel();

        self.pending.insert(id, waiter);

        if self.closed.load() || self.frames.send(message.into_frame(Some(id))).is_err() {
            self.pending.remove(&id);
            return Err(SignalingError::Closed);
        }

        let ack = match timeout(Self::ACK_TIMEOUT, response).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(_)) => return Err(SignalingError::Closed),
            Err(_) => {
                self.pending.remove(&id);
                return Err(SignalingError::Timeout(Self::ACK_TIMEOUT));
            }
        };

        if !ack.ok {
            let reason = ack.error.unwrap_or_else(|| "Request rejected".to_string());
            return Err(SignalingError::Rejected(reason));
        }

        Ok(ack)
    }
}

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use meshcall_collab::SignalingRouter;
use meshcall_core::{Ack, ClientMessage, Frame, Outbound, PeerId, RoomRequest};
use tokio::{sync::mpsc::unbounded_channel, task};
use validator::Validate;

use crate::{context::ServerContext, schemas::RoomRequestSchema, Router};

const INVALID_REQUEST: &str = "Invalid room request";

#[utoipa::path(
    get,
    path = "/v1/gateway",
    tag = "signaling",
    responses(
        (
            status = 101,
            description = "Switches to the signaling protocol over WebSocket"
        )
    )
)]
async fn gateway(State(context): State<ServerContext>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(socket, context))
}

async fn handle_socket(socket: WebSocket, context: ServerContext) {
    let router = context.collab.router.clone();
    let (mut sink, mut stream) = socket.split();

    let (outbox, mut inbox) = unbounded_channel::<Outbound>();

    let peer_id = router.connect(outbox);
    info!("Peer {} connected to the gateway", peer_id);

    let send_task = tokio::spawn(async move {
        while let Some(entry) = inbox.recv().await {
            let text = match entry.into_frame().to_text() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Could not encode frame: {}", e);
                    continue;
                }
            };

            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => handle_text(&router, &peer_id, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    router.disconnect(&peer_id);
    send_task.abort();

    info!("Peer {} left the gateway", peer_id);
}

/// Applies one frame from a client. Answers to requests are queued on the client's outbox,
/// behind everything the client was sent before.
async fn handle_text(router: &Arc<SignalingRouter>, peer_id: &PeerId, text: &str) {
    let frame = match Frame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Ignoring frame from {}: {}", peer_id, e);
            return;
        }
    };

    let ack_id = frame.ack;

    match ClientMessage::from_frame(frame) {
        Ok(ClientMessage::HostRoom(request) | ClientMessage::JoinRoom(request))
            if !validate(&request) =>
        {
            reject(router, peer_id, ack_id)
        }
        Ok(ClientMessage::HostRoom(request)) => {
            let (router, peer_id) = (router.clone(), peer_id.clone());
            run_blocking(move || {
                router.host_room(&peer_id, &request, ack_id);
            })
            .await
        }
        Ok(ClientMessage::JoinRoom(request)) => {
            let (router, peer_id) = (router.clone(), peer_id.clone());
            run_blocking(move || {
                router.join_room(&peer_id, &request, ack_id);
            })
            .await
        }
        Ok(ClientMessage::LeaveRoom) => {
            router.leave_room(peer_id);
        }
        Ok(message) => {
            if let Some(signal) = message.into_signal() {
                router.relay(peer_id, signal);
            }
        }
        Err(e) => {
            warn!("Ignoring message from {}: {}", peer_id, e);
            // Still answer, so the client is not left waiting
            reject(router, peer_id, ack_id)
        }
    }
}

/// Hosting and joining hash passwords, which must not stall the async workers.
async fn run_blocking(work: impl FnOnce() + Send + 'static) {
    if let Err(e) = task::spawn_blocking(work).await {
        warn!("Room request did not complete: {}", e);
    }
}

fn reject(router: &SignalingRouter, peer_id: &PeerId, ack_id: Option<u64>) {
    if let Some(id) = ack_id {
        router.acknowledge(peer_id, id, Ack::error(INVALID_REQUEST));
    }
}

fn validate(request: &RoomRequest) -> bool {
    RoomRequestSchema::from(request).validate().is_ok()
}

pub fn router() -> Router {
    Router::new().route("/gateway", get(gateway))
}

#[cfg(test)]
mod tests {
    use meshcall_collab::Collab;
    use meshcall_core::{PeerNotice, ServerMessage};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;

    fn connect(collab: &Collab) -> (PeerId, UnboundedReceiver<Outbound>) {
        let (outbox, mut inbox) = unbounded_channel();
        let peer_id = collab.router.connect(outbox);
        inbox.try_recv().unwrap();

        (peer_id, inbox)
    }

    fn frame(event: &str, data: serde_json::Value, ack: Option<u64>) -> String {
        json!({ "event": event, "data": data, "ack": ack }).to_string()
    }

    fn queued(inbox: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut entries = vec![];

        while let Ok(entry) = inbox.try_recv() {
            entries.push(entry);
        }

        entries
    }

    #[tokio::test]
    async fn test_host_room_is_acked() {
        let collab = Collab::new();
        let (peer_id, mut inbox) = connect(&collab);

        let text = frame("host-room", json!({ "roomId": "r1", "password": "p" }), Some(7));
        handle_text(&collab.router, &peer_id, &text).await;

        assert_eq!(queued(&mut inbox), vec![Outbound::Ack(7, Ack::ok())]);
    }

    #[tokio::test]
    async fn test_invalid_room_request_is_rejected() {
        let collab = Collab::new();
        let (peer_id, mut inbox) = connect(&collab);

        let long_id = "r".repeat(65);
        let text = frame("host-room", json!({ "roomId": long_id, "password": "p" }), Some(1));
        handle_text(&collab.router, &peer_id, &text).await;

        assert_eq!(
            queued(&mut inbox),
            vec![Outbound::Ack(1, Ack::error(INVALID_REQUEST))]
        );
        assert!(collab.rooms.summaries().is_empty());

        let text = frame("join-room", json!({ "roomId": "r1" }), Some(2));
        handle_text(&collab.router, &peer_id, &text).await;

        assert_eq!(
            queued(&mut inbox),
            vec![Outbound::Ack(2, Ack::error(INVALID_REQUEST))]
        );
    }

    #[tokio::test]
    async fn test_garbage_is_ignored() {
        let collab = Collab::new();
        let (peer_id, mut inbox) = connect(&collab);

        handle_text(&collab.router, &peer_id, "not json").await;
        handle_text(&collab.router, &peer_id, &frame("dance", json!({}), None)).await;

        assert!(queued(&mut inbox).is_empty());
    }

    #[tokio::test]
    async fn test_signals_and_leave_are_not_acked() {
        let collab = Collab::new();
        let (a, mut a_inbox) = connect(&collab);
        let (b, mut b_inbox) = connect(&collab);

        let host = frame("host-room", json!({ "roomId": "r1", "password": "p" }), Some(1));
        let join = frame("join-room", json!({ "roomId": "r1", "password": "p" }), Some(2));
        handle_text(&collab.router, &a, &host).await;
        handle_text(&collab.router, &b, &join).await;

        assert_eq!(
            queued(&mut b_inbox),
            vec![Outbound::Ack(2, Ack::with_peers(vec![a.clone()]))]
        );
        queued(&mut a_inbox);

        let offer = frame(
            "webrtc-offer",
            json!({ "to": b, "from": a, "sdp": { "type": "offer", "sdp": "v=0" } }),
            None,
        );
        handle_text(&collab.router, &a, &offer).await;

        assert!(matches!(
            queued(&mut b_inbox).as_slice(),
            [Outbound::Message(ServerMessage::WebrtcOffer(_))]
        ));
        assert!(queued(&mut a_inbox).is_empty());

        let leave = frame("leave-room", serde_json::Value::Null, None);
        handle_text(&collab.router, &b, &leave).await;

        assert_eq!(collab.rooms.room_of(&b), None);
        assert!(queued(&mut b_inbox).is_empty());
    }

    #[tokio::test]
    async fn test_join_ack_is_written_before_a_later_leave() {
        let collab = Collab::new();
        let (a, _a_inbox) = connect(&collab);
        let (x, mut x_inbox) = connect(&collab);

        let host = frame("host-room", json!({ "roomId": "r1", "password": "p" }), Some(1));
        let join = frame("join-room", json!({ "roomId": "r1", "password": "p" }), Some(5));
        let leave = frame("leave-room", serde_json::Value::Null, None);

        handle_text(&collab.router, &a, &host).await;
        handle_text(&collab.router, &x, &join).await;
        handle_text(&collab.router, &a, &leave).await;

        let frames: Vec<_> = queued(&mut x_inbox)
            .into_iter()
            .map(Outbound::into_frame)
            .collect();

        assert_eq!(
            frames,
            vec![
                Frame::ack(5, &Ack::with_peers(vec![a.clone()])),
                ServerMessage::PeerLeft(PeerNotice { peer_id: a }).into_frame(),
            ]
        );
    }
}

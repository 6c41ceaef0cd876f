use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info, warn};
use meshcall_core::{
    Ack, Outbound, Outbox, PeerId, PeerNotice, RoomRequest, ServerMessage, Signal,
};
use parking_lot::Mutex;

use crate::RoomRegistry;

/// Relays signaling messages between members of the same room.
///
/// The router never looks inside session descriptions or candidates. It only checks that
/// sender and target are current room-mates and forwards the payload as it came.
pub struct SignalingRouter {
    rooms: Arc<RoomRegistry>,
    /// The outbox of every connected transport
    links: DashMap<PeerId, Outbox>,
    /// Serializes host/join/leave together with their broadcasts and acks, so every member
    /// observes joins and leaves in the same order the registry applied them.
    /// Password hashing never happens while it is held.
    membership: Mutex<()>,
}

impl SignalingRouter {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self {
            rooms,
            links: Default::default(),
            membership: Default::default(),
        }
    }

    /// Registers a transport connection and returns the peer id assigned to it.
    /// The first message the connection receives is its `welcome`.
    pub fn connect(&self, outbox: Outbox) -> PeerId {
        let peer_id = PeerId::generate();

        outbox
            .send(Outbound::Message(ServerMessage::Welcome(PeerNotice {
                peer_id: peer_id.clone(),
            })))
            .ok();

        self.links.insert(peer_id.clone(), outbox);
        debug!("Peer {} connected", peer_id);

        peer_id
    }

    /// Hosts a room. With an ack id, the answer is also queued to the member.
    pub fn host_room(&self, member: &PeerId, request: &RoomRequest, ack_id: Option<u64>) -> Ack {
        let secret = self.rooms.secure(&request.password);

        let _membership = self.membership.lock();

        let ack = match secret.and_then(|s| self.rooms.create(&request.room_id, s, member)) {
            Ok(_) => Ack::ok(),
            Err(e) => {
                info!(
                    "Peer {} could not host room {}: {}",
                    member, request.room_id, e
                );
                Ack::error(e.to_string())
            }
        };

        if let Some(id) = ack_id {
            self.acknowledge(member, id, ack.clone());
        }

        ack
    }

    /// Admits the member and tells everyone already present about it.
    /// The ack lists the members the joiner should expect offers from.
    pub fn join_room(&self, member: &PeerId, request: &RoomRequest, ack_id: Option<u64>) -> Ack {
        let admission = self.rooms.admit(&request.room_id, &request.password);

        let _membership = self.membership.lock();

        let ack = match admission.and_then(|a| self.rooms.enter(a, member)) {
            Ok(view) => {
                for peer in &view.peers {
                    self.deliver(
                        peer,
                        ServerMessage::PeerJoined(PeerNotice {
                            peer_id: member.clone(),
                        }),
                    );
                }

                Ack::with_peers(view.peers)
            }
            Err(e) => {
                info!(
                    "Peer {} could not join room {}: {}",
                    member, request.room_id, e
                );
                Ack::error(e.to_string())
            }
        };

        if let Some(id) = ack_id {
            self.acknowledge(member, id, ack.clone());
        }

        ack
    }

    /// Queues the answer to a request behind everything already sent to the member.
    pub fn acknowledge(&self, member: &PeerId, id: u64, ack: Ack) -> bool {
        self.deliver(member, Outbound::Ack(id, ack))
    }

    /// Forwards a negotiation message if the target is a room-mate of the sender.
    /// Anything else is dropped, since the target may just have left.
    pub fn relay(&self, sender: &PeerId, signal: Signal) {
        if signal.from() != sender {
            warn!(
                "Dropping {} from {} claiming to be {}",
                signal.kind(),
                sender,
                signal.from()
            );
            return;
        }

        if !self.rooms.are_co_members(sender, signal.to()) {
            debug!(
                "Dropping {} from {} to {}: not a room-mate",
                signal.kind(),
                sender,
                signal.to()
            );
            return;
        }

        let to = signal.to().clone();
        self.deliver(&to, ServerMessage::from(signal));
    }

    /// Removes the member from its room, notifying the remaining members first.
    /// Returns whether the member was in a room.
    pub fn leave_room(&self, member: &PeerId) -> bool {
        let _membership = self.membership.lock();

        let Some(room_id) = self.rooms.room_of(member) else {
            return false;
        };

        for peer in self.rooms.members(&room_id).iter().filter(|p| *p != member) {
            self.deliver(
                peer,
                ServerMessage::PeerLeft(PeerNotice {
                    peer_id: member.clone(),
                }),
            );
        }

        self.rooms.leave(&room_id, member)
    }

    /// Handles a closed transport. This is an implicit leave.
    pub fn disconnect(&self, member: &PeerId) {
        self.leave_room(member);

        if self.links.remove(member).is_some() {
            debug!("Peer {} disconnected", member);
        }
    }

    fn deliver(&self, to: &PeerId, message: impl Into<Outbound>) -> bool {
        match self.links.get(to) {
            Some(outbox) => outbox.send(message.into()).is_ok(),
            None => false,
        }
    }
}

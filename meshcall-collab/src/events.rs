use crossbeam::channel::{Receiver, Sender};
use meshcall_core::PeerId;

use crate::RoomId;

pub type EventSender = Sender<CollabEvent>;
pub type EventReceiver = Receiver<CollabEvent>;

/// Membership changes emitted by the room registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollabEvent {
    /// A room was hosted
    RoomCreated { room_id: RoomId, host: PeerId },
    /// A member was admitted to a room
    MemberJoined { room_id: RoomId, member_id: PeerId },
    /// A member left a room, explicitly or by disconnecting
    MemberLeft { room_id: RoomId, member_id: PeerId },
    /// The last member left and the room was deleted
    RoomClosed { room_id: RoomId },
}

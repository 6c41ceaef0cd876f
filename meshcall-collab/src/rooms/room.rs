use meshcall_core::{PeerId, ROOM_CAPACITY};

use crate::RoomSecret;

pub type RoomId = String;

/// A password-gated group of members, in join order.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    pub(super) secret: RoomSecret,
    members: Vec<PeerId>,
}

/// What a member sees when it is admitted to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomView {
    pub room_id: RoomId,
    /// The members that were present before the admission, in join order.
    pub peers: Vec<PeerId>,
}

/// Public information about a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub id: RoomId,
    pub occupancy: usize,
    pub capacity: usize,
}

impl Room {
    pub(super) fn new(id: RoomId, secret: RoomSecret, host: PeerId) -> Self {
        Self {
            id,
            secret,
            members: vec![host],
        }
    }

    pub fn members(&self) -> &[PeerId] {
        &self.members
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= ROOM_CAPACITY
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(super) fn add_member(&mut self, member: PeerId) {
        self.members.push(member)
    }

    /// Removes the member, returning whether it was present
    pub(super) fn remove_member(&mut self, member: &PeerId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != member);

        self.members.len() != before
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            occupancy: self.members.len(),
            capacity: ROOM_CAPACITY,
        }
    }
}

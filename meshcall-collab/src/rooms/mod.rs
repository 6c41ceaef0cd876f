mod room;

pub use room::*;

use dashmap::{mapref::entry::Entry, DashMap};
use log::info;
use meshcall_core::PeerId;
use thiserror::Error;

use crate::{Auth, AuthError, CollabEvent, EventSender, RoomSecret};

/// The in-memory store of rooms and their members.
///
/// Admission is a compare-and-append: the capacity check and the append happen while the
/// room's map shard is write-locked, so two concurrent joins can never both observe a free
/// slot when only one is left. Password hashing and verification run before any lock is
/// taken.
///
/// A member belongs to at most one room. Hosting and joining claim the member's entry in
/// `memberships` before touching `rooms`, and nothing locks the two maps the other way
/// around.
pub struct RoomRegistry {
    auth: Auth,
    events: EventSender,
    rooms: DashMap<RoomId, Room>,
    /// The room each member currently belongs to
    memberships: DashMap<PeerId, RoomId>,
}

/// A password that matched a room's secret when it was checked.
#[derive(Debug)]
pub struct Admission {
    room_id: RoomId,
    secret: RoomSecret,
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Room already exists")]
    RoomExists,
    #[error("Room not found")]
    RoomNotFound,
    #[error("Incorrect password")]
    BadPassword,
    #[error("Room is full")]
    RoomFull,
    #[error("Already in a room")]
    AlreadyInRoom,
    #[error("Could not secure room: {0}")]
    Hash(String),
}

impl RoomRegistry {
    pub fn new(events: EventSender) -> Self {
        Self {
            auth: Auth::new(),
            events,
            rooms: Default::default(),
            memberships: Default::default(),
        }
    }

    /// Creates a room with the given member as its only member.
    pub fn host_room(
        &self,
        room_id: &str,
        password: &str,
        member: &PeerId,
    ) -> Result<RoomView, RoomError> {
        let secret = self.secure(password)?;
        self.create(room_id, secret, member)
    }

    /// Admits a member to an existing room, returning the members that were already there.
    pub fn join_room(
        &self,
        room_id: &str,
        password: &str,
        member: &PeerId,
    ) -> Result<RoomView, RoomError> {
        let admission = self.admit(room_id, password)?;
        self.enter(admission, member)
    }

    /// Hashes the password of a room about to be hosted.
    pub fn secure(&self, password: &str) -> Result<RoomSecret, RoomError> {
        self.auth
            .hash(password)
            .map_err(|e| RoomError::Hash(e.to_string()))
    }

    /// Registers a room whose password was already hashed with [Self::secure].
    pub fn create(
        &self,
        room_id: &str,
        secret: RoomSecret,
        member: &PeerId,
    ) -> Result<RoomView, RoomError> {
        let Entry::Vacant(membership) = self.memberships.entry(member.clone()) else {
            return Err(RoomError::AlreadyInRoom);
        };

        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(_) => return Err(RoomError::RoomExists),
            Entry::Vacant(entry) => {
                entry.insert(Room::new(room_id.to_string(), secret, member.clone()));
                membership.insert(room_id.to_string());
            }
        }

        info!("Member {} hosted room {}", member, room_id);

        self.emit(CollabEvent::RoomCreated {
            room_id: room_id.to_string(),
            host: member.clone(),
        });

        Ok(RoomView {
            room_id: room_id.to_string(),
            peers: vec![],
        })
    }

    /// Checks a password against the secret of an existing room.
    pub fn admit(&self, room_id: &str, password: &str) -> Result<Admission, RoomError> {
        let secret = self
            .rooms
            .get(room_id)
            .map(|r| r.secret.clone())
            .ok_or(RoomError::RoomNotFound)?;

        self.auth
            .verify(&secret, password)
            .map_err(|e| match e {
                AuthError::InvalidCredentials => RoomError::BadPassword,
                AuthError::HashError(e) => RoomError::Hash(e),
            })?;

        Ok(Admission {
            room_id: room_id.to_string(),
            secret,
        })
    }

    /// Appends an admitted member to the room if there is a free slot.
    pub fn enter(&self, admission: Admission, member: &PeerId) -> Result<RoomView, RoomError> {
        let Entry::Vacant(membership) = self.memberships.entry(member.clone()) else {
            return Err(RoomError::AlreadyInRoom);
        };

        let peers = {
            let mut room = self
                .rooms
                .get_mut(&admission.room_id)
                .ok_or(RoomError::RoomNotFound)?;

            // Closed and hosted again since the password was checked
            if room.secret != admission.secret {
                return Err(RoomError::RoomNotFound);
            }

            if room.is_full() {
                return Err(RoomError::RoomFull);
            }

            let previous = room.members().to_vec();

            room.add_member(member.clone());
            membership.insert(admission.room_id.clone());

            previous
        };

        let room_id = admission.room_id;

        info!(
            "Member {} joined room {} ({} already present)",
            member,
            room_id,
            peers.len()
        );

        self.emit(CollabEvent::MemberJoined {
            room_id: room_id.clone(),
            member_id: member.clone(),
        });

        Ok(RoomView { room_id, peers })
    }

    /// Removes a member from a room, deleting the room if it becomes empty.
    /// Returns whether the member was present. Removing an absent member does nothing.
    pub fn leave(&self, room_id: &str, member: &PeerId) -> bool {
        let (removed, now_empty) = match self.rooms.get_mut(room_id) {
            Some(mut room) => {
                let removed = room.remove_member(member);
                (removed, room.is_empty())
            }
            None => (false, false),
        };

        if removed {
            self.memberships.remove_if(member, |_, r| r == room_id);

            info!("Member {} left room {}", member, room_id);

            self.emit(CollabEvent::MemberLeft {
                room_id: room_id.to_string(),
                member_id: member.clone(),
            });
        }

        // Someone may have joined since the shard was released, so check again
        if now_empty && self.rooms.remove_if(room_id, |_, r| r.is_empty()).is_some() {
            info!("Room {} closed", room_id);

            self.emit(CollabEvent::RoomClosed {
                room_id: room_id.to_string(),
            });
        }

        removed
    }

    /// Returns the room the member belongs to, if any
    pub fn room_of(&self, member: &PeerId) -> Option<RoomId> {
        self.memberships.get(member).map(|r| r.value().clone())
    }

    /// Returns the members of a room in join order
    pub fn members(&self, room_id: &str) -> Vec<PeerId> {
        self.rooms
            .get(room_id)
            .map(|r| r.members().to_vec())
            .unwrap_or_default()
    }

    /// Returns true if both are distinct members of the same room
    pub fn are_co_members(&self, a: &PeerId, b: &PeerId) -> bool {
        if a == b {
            return false;
        }

        match (self.room_of(a), self.room_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    pub fn summary(&self, room_id: &str) -> Option<RoomSummary> {
        self.rooms.get(room_id).map(|r| r.summary())
    }

    pub fn summaries(&self) -> Vec<RoomSummary> {
        let mut summaries: Vec<_> = self.rooms.iter().map(|r| r.summary()).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));

        summaries
    }

    fn emit(&self, event: CollabEvent) {
        // Nobody listening is fine
        self.events.send(event).ok();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    use crossbeam::channel::unbounded;

    use super::*;
    use crate::EventReceiver;

    fn registry() -> (RoomRegistry, EventReceiver) {
        let (sender, receiver) = unbounded();
        (RoomRegistry::new(sender), receiver)
    }

    fn peer(id: &str) -> PeerId {
        PeerId::from(id)
    }

    #[test]
    fn test_host_and_join_in_order() {
        let (rooms, _events) = registry();

        let hosted = rooms.host_room("r1", "p", &peer("a")).unwrap();
        assert!(hosted.peers.is_empty());

        let joined = rooms.join_room("r1", "p", &peer("b")).unwrap();
        assert_eq!(joined.peers, vec![peer("a")]);

        let joined = rooms.join_room("r1", "p", &peer("c")).unwrap();
        assert_eq!(joined.peers, vec![peer("a"), peer("b")]);

        assert_eq!(rooms.members("r1"), vec![peer("a"), peer("b"), peer("c")]);
    }

    #[test]
    fn test_host_existing_room() {
        let (rooms, _events) = registry();

        rooms.host_room("r1", "p", &peer("a")).unwrap();
        let result = rooms.host_room("r1", "other", &peer("b"));

        assert!(matches!(result, Err(RoomError::RoomExists)));
        assert_eq!(rooms.room_of(&peer("b")), None);
    }

    #[test]
    fn test_join_missing_room() {
        let (rooms, _events) = registry();

        let result = rooms.join_room("nope", "p", &peer("a"));
        assert!(matches!(result, Err(RoomError::RoomNotFound)));
    }

    #[test]
    fn test_bad_password_does_not_mutate() {
        let (rooms, _events) = registry();

        rooms.host_room("r1", "p", &peer("a")).unwrap();
        let result = rooms.join_room("r1", "wrong", &peer("b"));

        assert!(matches!(result, Err(RoomError::BadPassword)));
        assert_eq!(rooms.members("r1"), vec![peer("a")]);
        assert_eq!(rooms.room_of(&peer("b")), None);
    }

    #[test]
    fn test_fifth_member_is_rejected() {
        let (rooms, _events) = registry();

        rooms.host_room("r1", "p", &peer("a")).unwrap();
        for id in ["b", "c", "d"] {
            rooms.join_room("r1", "p", &peer(id)).unwrap();
        }

        let result = rooms.join_room("r1", "p", &peer("e"));
        assert!(matches!(result, Err(RoomError::RoomFull)));
        assert_eq!(rooms.members("r1").len(), 4);
    }

    #[test]
    fn test_concurrent_joins_respect_capacity() {
        let (rooms, _events) = registry();
        let rooms = Arc::new(rooms);

        rooms.host_room("r1", "p", &peer("host")).unwrap();

        let contenders = 8;
        let barrier = Arc::new(Barrier::new(contenders));

        let handles: Vec<_> = (0..contenders)
            .map(|i| {
                let rooms = rooms.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    barrier.wait();
                    rooms.join_room("r1", "p", &PeerId::from(format!("guest-{}", i)))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let admitted = results.iter().filter(|r| r.is_ok()).count();
        let full = results
            .iter()
            .filter(|r| matches!(r, Err(RoomError::RoomFull)))
            .count();

        assert_eq!(admitted, 3);
        assert_eq!(full, contenders - 3);
        assert_eq!(rooms.members("r1").len(), 4);
    }

    #[test]
    fn test_member_cannot_be_in_two_rooms() {
        let (rooms, _events) = registry();

        rooms.host_room("r1", "p", &peer("a")).unwrap();
        rooms.host_room("r2", "p", &peer("b")).unwrap();

        assert!(matches!(
            rooms.join_room("r2", "p", &peer("a")),
            Err(RoomError::AlreadyInRoom)
        ));
        assert!(matches!(
            rooms.host_room("r3", "p", &peer("a")),
            Err(RoomError::AlreadyInRoom)
        ));
    }

    #[test]
    fn test_one_room_per_member_under_contention() {
        let (rooms, _events) = registry();
        let rooms = Arc::new(rooms);

        let contenders = 8;
        let barrier = Arc::new(Barrier::new(contenders));
        let member = peer("a");

        let handles: Vec<_> = (0..contenders)
            .map(|i| {
                let rooms = rooms.clone();
                let barrier = barrier.clone();
                let secret = rooms.secure("p").unwrap();
                let member = member.clone();

                thread::spawn(move || {
                    barrier.wait();
                    rooms.create(&format!("room-{}", i), secret, &member)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let hosted = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(RoomError::AlreadyInRoom)))
            .count();

        assert_eq!(hosted, 1);
        assert_eq!(refused, contenders - 1);
        assert_eq!(rooms.summaries().len(), 1);
    }

    #[test]
    fn test_admission_does_not_carry_over_to_new_room() {
        let (rooms, _events) = registry();

        rooms.host_room("r1", "p", &peer("a")).unwrap();
        let admission = rooms.admit("r1", "p").unwrap();

        // The room closes and someone else hosts one with the same id
        rooms.leave("r1", &peer("a"));
        rooms.host_room("r1", "other", &peer("c")).unwrap();

        let result = rooms.enter(admission, &peer("b"));

        assert!(matches!(result, Err(RoomError::RoomNotFound)));
        assert_eq!(rooms.members("r1"), vec![peer("c")]);
        assert_eq!(rooms.room_of(&peer("b")), None);
    }

    #[test]
    fn test_leave_is_idempotent_and_deletes_empty_rooms() {
        let (rooms, events) = registry();

        rooms.host_room("r1", "p", &peer("a")).unwrap();
        rooms.join_room("r1", "p", &peer("b")).unwrap();

        assert!(rooms.leave("r1", &peer("a")));
        assert!(!rooms.leave("r1", &peer("a")));
        assert_eq!(rooms.members("r1"), vec![peer("b")]);

        assert!(rooms.leave("r1", &peer("b")));
        assert!(rooms.summary("r1").is_none());
        assert!(!rooms.leave("r1", &peer("b")));

        // The room id is free again
        rooms.host_room("r1", "new", &peer("c")).unwrap();

        let emitted: Vec<_> = events.try_iter().collect();
        assert_eq!(
            emitted,
            vec![
                CollabEvent::RoomCreated {
                    room_id: "r1".to_string(),
                    host: peer("a")
                },
                CollabEvent::MemberJoined {
                    room_id: "r1".to_string(),
                    member_id: peer("b")
                },
                CollabEvent::MemberLeft {
                    room_id: "r1".to_string(),
                    member_id: peer("a")
                },
                CollabEvent::MemberLeft {
                    room_id: "r1".to_string(),
                    member_id: peer("b")
                },
                CollabEvent::RoomClosed {
                    room_id: "r1".to_string()
                },
                CollabEvent::RoomCreated {
                    room_id: "r1".to_string(),
                    host: peer("c")
                },
            ]
        );
    }

    #[test]
    fn test_co_membership() {
        let (rooms, _events) = registry();

        rooms.host_room("r1", "p", &peer("a")).unwrap();
        rooms.join_room("r1", "p", &peer("b")).unwrap();
        rooms.host_room("r2", "p", &peer("c")).unwrap();

        assert!(rooms.are_co_members(&peer("a"), &peer("b")));
        assert!(!rooms.are_co_members(&peer("a"), &peer("a")));
        assert!(!rooms.are_co_members(&peer("a"), &peer("c")));
        assert!(!rooms.are_co_members(&peer("a"), &peer("ghost")));
    }

    #[test]
    fn test_summaries_hide_secrets() {
        let (rooms, _events) = registry();

        rooms.host_room("b-room", "p", &peer("a")).unwrap();
        rooms.host_room("a-room", "p", &peer("b")).unwrap();
        rooms.join_room("a-room", "p", &peer("c")).unwrap();

        let summaries = rooms.summaries();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, "a-room");
        assert_eq!(summaries[0].occupancy, 2);
        assert_eq!(summaries[0].capacity, 4);
    }
}

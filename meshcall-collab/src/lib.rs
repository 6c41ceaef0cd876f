mod auth;
mod events;
mod rooms;
mod router;

use std::sync::Arc;

use crossbeam::channel::unbounded;

pub use auth::*;
pub use events::*;
pub use rooms::*;
pub use router::*;

/// The meshcall collab system: the room registry and the signaling router built on it.
pub struct Collab {
    pub rooms: Arc<RoomRegistry>,
    pub router: Arc<SignalingRouter>,

    event_receiver: EventReceiver,
}

impl Collab {
    pub fn new() -> Self {
        let (event_sender, event_receiver) = unbounded();

        let rooms = Arc::new(RoomRegistry::new(event_sender));
        let router = Arc::new(SignalingRouter::new(rooms.clone()));

        Self {
            rooms,
            router,
            event_receiver,
        }
    }

    /// Blocks until the registry emits an event. Returns None once the registry is gone.
    pub fn wait_for_event(&self) -> Option<CollabEvent> {
        self.event_receiver.recv().ok()
    }

    /// Returns a receiver for registry events, to drain them on another thread.
    pub fn events(&self) -> EventReceiver {
        self.event_receiver.clone()
    }
}

impl Default for Collab {
    fn default() -> Self {
        Self::new()
    }
}

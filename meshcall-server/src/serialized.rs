//! All schemas that are exposed from endpoints are defined here
//! along with the From<T> impls

use meshcall_collab::RoomSummary as CollabRoomSummary;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct RoomSummary {
    id: String,
    /// How many members are currently in the room
    occupancy: usize,
    capacity: usize,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl ToSerialized<RoomSummary> for CollabRoomSummary {
    fn to_serialized(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            occupancy: self.occupancy,
            capacity: self.capacity,
        }
    }
}

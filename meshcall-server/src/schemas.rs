use meshcall_core::RoomRequest;
use validator::Validate;

/// The limits a `host-room` or `join-room` payload must respect.
#[derive(Debug, Validate)]
pub struct RoomRequestSchema {
    #[validate(length(min = 1, max = 64))]
    pub room_id: String,
    #[validate(length(max = 128))]
    pub password: String,
}

impl From<&RoomRequest> for RoomRequestSchema {
    fn from(value: &RoomRequest) -> Self {
        Self {
            room_id: value.room_id.clone(),
            password: value.password.clone(),
        }
    }
}

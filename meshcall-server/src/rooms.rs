use axum::{
    extract::{Path, State},
    routing::get,
    Json,
};

use crate::{
    context::ServerContext,
    errors::{ServerError, ServerResult},
    serialized::{RoomSummary, ToSerialized},
    Router,
};

#[utoipa::path(
    get,
    path = "/v1/rooms",
    tag = "rooms",
    responses(
        (status = 200, body = Vec<RoomSummary>)
    )
)]
async fn list_rooms(State(context): State<ServerContext>) -> Json<Vec<RoomSummary>> {
    Json(context.collab.rooms.summaries().to_serialized())
}

#[utoipa::path(
    get,
    path = "/v1/rooms/{id}",
    tag = "rooms",
    params(
        ("id" = String, Path, description = "The room id")
    ),
    responses(
        (status = 200, body = RoomSummary),
        (status = 404, description = "There is no room with that id")
    )
)]
async fn room(
    State(context): State<ServerContext>,
    Path(id): Path<String>,
) -> ServerResult<Json<RoomSummary>> {
    let summary = context
        .collab
        .rooms
        .summary(&id)
        .ok_or(ServerError::NotFound {
            resource: "room",
            identifier: id,
        })?;

    Ok(Json(summary.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_rooms))
        .route("/:id", get(room))
}

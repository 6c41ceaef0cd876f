use axum::{response::IntoResponse, Json};
use utoipa::OpenApi;
use utoipauto::utoipauto;

#[utoipauto(paths = "./meshcall-server/src")]
#[derive(OpenApi)]
#[openapi(
    info(
        description = "meshcall-server coordinates rooms and relays signaling for mesh calls"
    ))
]
pub struct ApiDoc;

pub async fn docs() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

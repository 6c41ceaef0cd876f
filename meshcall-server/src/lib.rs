use axum::routing::get;
use log::info;
use meshcall_core::Config;
use std::{
    io,
    net::{Ipv6Addr, SocketAddr},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

mod context;
mod docs;
mod errors;
mod gateway;
mod rooms;
mod schemas;
mod serialized;
mod sse;

pub use context::*;
pub use sse::{ServerEvent, ServerSentEvents};

pub type Router = axum::Router<ServerContext>;

/// Builds the HTTP surface: the signaling gateway, room listings, the event stream and the API document.
pub fn app(context: ServerContext) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let version_one_router = Router::new()
        .merge(gateway::router())
        .nest("/rooms", rooms::router())
        .nest("/events", sse::router());

    Router::new()
        .nest("/v1", version_one_router)
        .route("/api.json", get(docs::docs))
        .layer(cors)
        .with_state(context)
}

/// Serves the meshcall server on an already bound listener
pub async fn serve(listener: TcpListener, context: ServerContext) -> io::Result<()> {
    axum::serve(listener, app(context)).await
}

/// Starts the meshcall server
pub async fn run_server(context: ServerContext, config: &Config) -> io::Result<()> {
    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, config.port).into();
    let listener = TcpListener::bind(&addr).await?;

    info!("Listening on port {}", config.port);

    serve(listener, context).await
}

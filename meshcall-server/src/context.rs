use std::sync::Arc;

use axum::extract::FromRef;
use meshcall_collab::Collab;

use crate::ServerSentEvents;

#[derive(Clone, FromRef)]
pub struct ServerContext {
    pub collab: Arc<Collab>,
    pub sse: Arc<ServerSentEvents>,
}

impl ServerContext {
    pub fn new(collab: Arc<Collab>) -> Self {
        Self {
            collab,
            sse: ServerSentEvents::new(),
        }
    }
}

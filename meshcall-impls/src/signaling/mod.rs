mod websocket_signaling;

pub use websocket_signaling::*;

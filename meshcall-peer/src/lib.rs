//! The client half of a meshcall room.
//!
//! Every remote member gets its own [PeerSession], driven by a task of its own, so
//! negotiations with different peers progress independently. The [PeerSessionTable]
//! owns those sessions, and the [MeshClient] feeds them from the signaling stream.

mod client;
mod negotiator;
mod session;
mod table;

#[cfg(test)]
mod testing;

pub use client::*;
pub use negotiator::*;
pub use session::*;
pub use table::*;

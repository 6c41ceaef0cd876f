mod negotiators;
mod signaling;

pub use negotiators::*;
pub use signaling::*;
